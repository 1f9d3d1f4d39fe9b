//! The Block Graph (§4.6): maps code addresses to block records and supports the
//! traversal, cleaning, and invalidation operations a driver needs between runs.
//!
//! Per §9 ("Global mutable maps -> owned Manager state"), the per-entry-point maps
//! the source kept as process-wide globals are owned here rather than as statics;
//! [`crate::cluster::ClusterManager`] holds one [`BlockGraph`] per analysis and
//! clears it between entry-points.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::token::{meta_tag, ForkHierarchy, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    Invalid,
    Subroutine,
    Goto,
    Fork,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub addr: u64,
    pub addr_end: u64,
    pub ty: BlockType,
    pub fork_hierarchy: ForkHierarchy,
}

impl Block {
    pub fn new(addr: u64, ty: BlockType, fork_hierarchy: ForkHierarchy) -> Self {
        Self { addr, addr_end: addr, ty, fork_hierarchy }
    }

    /// Number of bytes the block currently spans, advancing as tokens are appended.
    pub fn size(&self) -> u64 {
        self.addr_end.saturating_sub(self.addr)
    }

    /// The tail of the fork hierarchy, or `None` for "root" (§3).
    pub fn creator(&self) -> Option<u32> {
        self.fork_hierarchy.creator()
    }

    /// Grows `addr_end` to cover a newly inserted token at `pc`, enforcing
    /// invariant 2 of §3 (every token's pc lies within its block's range).
    pub fn extend_to(&mut self, pc: u64) {
        if pc >= self.addr_end {
            self.addr_end = pc + 4;
        }
    }
}

/// Reserved `str` values that carry a control-flow target in `args[0]`, followed
/// by `clean_blocks`/`invalidate_blocktree` traversal (§4.6).
fn is_control_flow_tag(tag: &str) -> bool {
    matches!(
        tag,
        meta_tag::SUB_BRANCH
            | meta_tag::SUB_RETBRANCH
            | meta_tag::SUB_GOTO
            | meta_tag::DIV_TRUE
            | meta_tag::DIV_FALSE
            | meta_tag::CONV
            | meta_tag::LOOPCONV
    )
}

#[derive(Debug, Default)]
pub struct BlockGraph {
    blocks: HashMap<u64, Block>,
    pub converge_points: HashMap<u64, bool>,
    pub is_goto_dst: HashMap<u64, bool>,
    pub is_fork_origin: HashMap<u64, bool>,
}

impl BlockGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u64) -> Option<&Block> {
        self.blocks.get(&addr)
    }

    pub fn get_mut(&mut self, addr: u64) -> Option<&mut Block> {
        self.blocks.get_mut(&addr)
    }

    /// Creates the block at `addr` if absent, demoting nothing already there.
    pub fn get_or_create(&mut self, addr: u64, ty: BlockType, fork_hierarchy: ForkHierarchy) -> &mut Block {
        self.blocks.entry(addr).or_insert_with(|| Block::new(addr, ty, fork_hierarchy))
    }

    pub fn block_type(&self, addr: u64) -> BlockType {
        self.blocks.get(&addr).map(|b| b.ty).unwrap_or(BlockType::Invalid)
    }

    pub fn is_converge_point(&self, addr: u64) -> bool {
        self.converge_points.get(&addr).copied().unwrap_or(false)
    }

    pub fn mark_converge_point(&mut self, addr: u64) {
        self.converge_points.insert(addr, true);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// DFS from `entry`, visiting blocks reached via control-flow tokens (§4.6),
    /// pushing successors into a work list sorted descending (smallest address
    /// visited last) so fall-through paths surface first.
    fn traverse(&self, entry: u64, tokens: &HashMap<u64, std::collections::BTreeSet<Token>>) -> Vec<u64> {
        let mut visited = Vec::new();
        let mut seen = hashbrown::HashSet::new();
        let mut work = vec![entry];
        seen.insert(entry);

        while let Some(block_addr) = work.pop() {
            visited.push(block_addr);
            let Some(block_tokens) = tokens.get(&block_addr) else { continue };
            let mut successors: Vec<u64> = Vec::new();
            for token in block_tokens {
                if is_control_flow_tag(&token.str) {
                    if let Some(target) = token.target_block() {
                        if seen.insert(target) {
                            successors.push(target);
                        }
                    }
                }
            }
            successors.sort_unstable_by(|a, b| b.cmp(a));
            work.extend(successors);
        }
        visited
    }

    /// Two-phase pass (§4.6): count tokens per unique fork-hierarchy key across the
    /// reachable subtree, then drop every `CONV` token whose key occurs exactly once
    /// (a singleton convergence never rejoined anything and is spurious).
    pub fn clean_blocks(&self, entry: u64, tokens: &mut HashMap<u64, std::collections::BTreeSet<Token>>) {
        let visited = self.traverse(entry, tokens);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for block_addr in &visited {
            if let Some(block_tokens) = tokens.get(block_addr) {
                for token in block_tokens {
                    *counts.entry(token.fork_hierarchy.as_key()).or_insert(0) += 1;
                }
            }
        }

        for block_addr in &visited {
            if let Some(block_tokens) = tokens.get_mut(block_addr) {
                block_tokens.retain(|token| {
                    if token.is_meta_tag(meta_tag::CONV) {
                        counts.get(&token.fork_hierarchy.as_key()).copied().unwrap_or(0) != 1
                    } else {
                        true
                    }
                });
            }
        }
    }

    /// Resets all state for the reachable subtree of `entry` so the driver can
    /// re-analyze it from scratch (§4.6).
    pub fn invalidate_blocktree(&mut self, entry: u64, tokens: &mut HashMap<u64, std::collections::BTreeSet<Token>>) {
        let visited = self.traverse(entry, tokens);

        for block_addr in &visited {
            if let Some(block_tokens) = tokens.get(block_addr) {
                for token in block_tokens {
                    self.converge_points.insert(token.pc, false);
                    self.is_goto_dst.insert(token.pc, false);
                    self.is_fork_origin.insert(token.pc, false);
                }
            }
            tokens.remove(block_addr);
            self.blocks.remove(block_addr);
        }
        // Demote (rather than remove) so a later lookup sees `Invalid` per invariant 4 (§3).
        for block_addr in &visited {
            self.blocks.insert(
                *block_addr,
                Block::new(*block_addr, BlockType::Invalid, ForkHierarchy::root()),
            );
        }
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.converge_points.clear();
        self.is_goto_dst.clear();
        self.is_fork_origin.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;
    use std::collections::BTreeSet;

    fn conv_token(pc: u64, fh: ForkHierarchy, target: u64) -> Token {
        let mut t = Token::new(pc, fh, TokenType::Meta, meta_tag::CONV);
        t.args = vec![target];
        t
    }

    #[test]
    fn clean_blocks_removes_singleton_convergences() {
        let graph = BlockGraph::new();
        let mut tokens: HashMap<u64, BTreeSet<Token>> = HashMap::new();
        let mut set = BTreeSet::new();
        set.insert(conv_token(0x100, ForkHierarchy(vec![1]), 0x200));
        tokens.insert(0x100, set);

        graph.clean_blocks(0x100, &mut tokens);
        assert!(tokens.get(&0x100).unwrap().is_empty());
    }

    #[test]
    fn clean_blocks_keeps_convergences_shared_by_multiple_tokens() {
        let graph = BlockGraph::new();
        let mut tokens: HashMap<u64, BTreeSet<Token>> = HashMap::new();
        let fh = ForkHierarchy(vec![1]);
        let mut set = BTreeSet::new();
        set.insert(conv_token(0x100, fh.clone(), 0x200));
        set.insert(Token::new(0x100, fh, TokenType::Func, "some_call"));
        tokens.insert(0x100, set);

        graph.clean_blocks(0x100, &mut tokens);
        assert_eq!(tokens.get(&0x100).unwrap().len(), 2);
    }

    #[test]
    fn clean_blocks_is_idempotent() {
        let graph = BlockGraph::new();
        let mut tokens: HashMap<u64, BTreeSet<Token>> = HashMap::new();
        let fh = ForkHierarchy(vec![1]);
        let mut set = BTreeSet::new();
        set.insert(conv_token(0x100, fh.clone(), 0x200));
        set.insert(Token::new(0x100, fh, TokenType::Func, "some_call"));
        tokens.insert(0x100, set);

        graph.clean_blocks(0x100, &mut tokens);
        let once = tokens.clone();
        graph.clean_blocks(0x100, &mut tokens);
        assert_eq!(once, tokens);
    }

    #[test]
    fn invalidate_blocktree_demotes_and_clears() {
        let mut graph = BlockGraph::new();
        graph.get_or_create(0x100, BlockType::Subroutine, ForkHierarchy::root());
        graph.mark_converge_point(0x100);
        let mut tokens: HashMap<u64, BTreeSet<Token>> = HashMap::new();
        let mut set = BTreeSet::new();
        set.insert(Token::new(0x100, ForkHierarchy::root(), TokenType::Func, "x"));
        tokens.insert(0x100, set);

        graph.invalidate_blocktree(0x100, &mut tokens);
        assert_eq!(graph.block_type(0x100), BlockType::Invalid);
        assert!(!graph.is_converge_point(0x100));
        assert!(tokens.get(&0x100).is_none());
    }
}
