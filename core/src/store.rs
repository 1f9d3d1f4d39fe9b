//! The Token Store (§4.5): holds the per-block ordered token sets and implements
//! the priority-replacement and convergence rules that make output deterministic
//! regardless of scheduling order (§5).

use hashbrown::HashMap;
use std::collections::BTreeSet;

use crate::token::{meta_tag, ForkHierarchy, Token, TokenType};

#[derive(Debug)]
pub enum ConvergenceOutcome {
    /// No convergence applies; the candidate should go through `add_by_priority`.
    Proceed(Token),
    /// The instance that produced this candidate has independently converged with
    /// an ancestor and must terminate. `token` is `Some` only if the instance had
    /// already emitted at least one token (§4.5: suppress zero-token forks).
    Converged { token: Option<Token> },
}

#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: HashMap<u64, BTreeSet<Token>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_tokens(&self, block_addr: u64) -> Option<&BTreeSet<Token>> {
        self.tokens.get(&block_addr)
    }

    pub fn all_blocks(&self) -> impl Iterator<Item = (&u64, &BTreeSet<Token>)> {
        self.tokens.iter()
    }

    pub fn as_map_mut(&mut self) -> &mut HashMap<u64, BTreeSet<Token>> {
        &mut self.tokens
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    /// §4.5 convergence detection, run before priority replacement. `term_block`
    /// is the block the instance would have terminated at, used as `args[1]` of
    /// the emitted `CONV` token.
    pub fn check_convergence(
        &self,
        candidate: Token,
        has_parent: bool,
        has_start_addr: bool,
        converge_already_set: bool,
        outputted_tokens: u32,
        term_block: u64,
    ) -> ConvergenceOutcome {
        if !(converge_already_set && has_parent && has_start_addr) {
            return ConvergenceOutcome::Proceed(candidate);
        }

        let origin = candidate.pc;
        let smallest = self
            .tokens
            .values()
            .flat_map(|set| set.iter())
            .filter(|t| t.pc == origin && matches!(t.ty, TokenType::Func | TokenType::Branch))
            .map(|t| &t.fork_hierarchy)
            .min();

        // The parent already dominates or ties this candidate's priority (§9: the
        // priority order is a (length, head) discriminator) => this fork is redundant.
        let converged = matches!(smallest, Some(existing) if candidate.fork_hierarchy >= *existing);

        if converged {
            let token = (outputted_tokens > 0).then(|| {
                Token::meta(origin, candidate.fork_hierarchy.clone(), meta_tag::CONV, vec![origin, term_block])
            });
            ConvergenceOutcome::Converged { token }
        } else {
            ConvergenceOutcome::Proceed(candidate)
        }
    }

    /// Priority rule of §4.5, applied across all blocks. Returns whether the
    /// candidate was inserted.
    pub fn add_by_priority(&mut self, block_addr: u64, candidate: Token) -> bool {
        let mut to_remove: Vec<(u64, Token)> = Vec::new();

        for (&addr, set) in self.tokens.iter() {
            for t in set.iter() {
                if t.pc != candidate.pc || t.str != candidate.str {
                    continue;
                }
                let c_len = candidate.fork_hierarchy.len();
                let t_len = t.fork_hierarchy.len();
                if c_len < t_len {
                    to_remove.push((addr, t.clone()));
                } else if c_len == t_len {
                    if t.fork_hierarchy.head() > candidate.fork_hierarchy.head() {
                        to_remove.push((addr, t.clone()));
                    }
                } else {
                    // Strictly longer ancestry than an existing, higher-priority token:
                    // drop the candidate without inserting it (§4.5).
                    return false;
                }
            }
        }

        for (addr, t) in to_remove {
            if let Some(set) = self.tokens.get_mut(&addr) {
                set.remove(&t);
            }
        }

        self.tokens.entry(block_addr).or_default().insert(candidate);
        true
    }

    /// Removes all tokens at `pc` whose `str` matches `tag`, across all blocks.
    pub fn remove_matching(&mut self, pc: u64, tag: &str) {
        for set in self.tokens.values_mut() {
            set.retain(|t| !(t.pc == pc && t.str == tag));
        }
    }

    /// Inserting a `CONV`/`DIV_*`/ordinary-call token first clears pessimistic
    /// `SUB_BRANCH`/`SUB_GOTO` placeholders at the same `pc` (§4.5).
    pub fn add_subreplace(&mut self, block_addr: u64, candidate: Token) -> bool {
        self.remove_matching(candidate.pc, meta_tag::SUB_BRANCH);
        self.remove_matching(candidate.pc, meta_tag::SUB_GOTO);
        self.add_by_priority(block_addr, candidate)
    }
}
