//! Tokens: the unit of recovered behavior (§3). A token records one observable
//! event — a runtime call, a value construction, a branch, or a convergence —
//! together with the fork lineage that produced it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Reserved `str` values used for control-flow bookkeeping tokens, as opposed to
/// the demangled name of an imported symbol.
pub mod meta_tag {
    pub const SUB_BRANCH: &str = "SUB_BRANCH";
    pub const SUB_RETBRANCH: &str = "SUB_RETBRANCH";
    pub const SUB_GOTO: &str = "SUB_GOTO";
    pub const DIV_TRUE: &str = "DIV_TRUE";
    pub const DIV_FALSE: &str = "DIV_FALSE";
    pub const CONV: &str = "CONV";
    pub const LOOPCONV: &str = "LOOPCONV";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenType {
    Invalid = 0,
    Func = 1,
    Branch = 2,
    Meta = 3,
}

/// A fork lineage: fork ids recorded youngest-first. Priority comparisons (§4.5,
/// §9) only ever inspect `len()` and `head()`, never the tail, but the full
/// sequence is retained for `fork_hierarchy_str` and block bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkHierarchy(pub Vec<u32>);

impl ForkHierarchy {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Appends a fresh child id, youngest-first (the new id becomes element 0).
    pub fn child(&self, new_id: u32) -> Self {
        let mut ids = Vec::with_capacity(self.0.len() + 1);
        ids.push(new_id);
        ids.extend_from_slice(&self.0);
        Self(ids)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn head(&self) -> Option<u32> {
        self.0.first().copied()
    }

    /// The block/token "creator": the tail (oldest ancestor) of the hierarchy, or
    /// `None` for "root" (§3).
    pub fn creator(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Youngest-first, "->"-joined, matching the source's `fork_hierarchy_str`.
    pub fn as_key(&self) -> String {
        self.0.iter().map(u32::to_string).collect::<Vec<_>>().join("->")
    }
}

/// Ordering used by the priority rule (§4.5, §9): only `(len, head)` matter.
impl PartialOrd for ForkHierarchy {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ForkHierarchy {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len().cmp(&other.len()).then_with(|| self.head().cmp(&other.head()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The caller address, not the import slot (§3).
    pub pc: u64,
    pub fork_hierarchy: ForkHierarchy,
    pub str: String,
    pub ty: TokenType,
    pub args: Vec<u64>,
    pub arg_is_const_value: Vec<usize>,
    pub fargs: Vec<f32>,
}

impl Token {
    pub fn new(pc: u64, fork_hierarchy: ForkHierarchy, ty: TokenType, str: impl Into<String>) -> Self {
        Self {
            pc,
            fork_hierarchy,
            str: str.into(),
            ty,
            args: Vec::new(),
            arg_is_const_value: Vec::new(),
            fargs: Vec::new(),
        }
    }

    pub fn meta(pc: u64, fork_hierarchy: ForkHierarchy, tag: &str, args: Vec<u64>) -> Self {
        Self { args, ..Self::new(pc, fork_hierarchy, TokenType::Meta, tag) }
    }

    pub fn is_meta_tag(&self, tag: &str) -> bool {
        self.str == tag
    }

    pub fn target_block(&self) -> Option<u64> {
        self.args.first().copied()
    }
}

impl Eq for Token {}

/// Strict total order: lexicographic by `(pc, fork_hierarchy, type, str, args, fargs)` (§3).
impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pc
            .cmp(&other.pc)
            .then_with(|| self.fork_hierarchy.cmp(&other.fork_hierarchy))
            .then_with(|| self.ty.cmp(&other.ty))
            .then_with(|| self.str.cmp(&other.str))
            .then_with(|| self.args.cmp(&other.args))
            .then_with(|| {
                self.fargs
                    .iter()
                    .map(|f| f.to_bits())
                    .cmp(other.fargs.iter().map(|f| f.to_bits()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_hierarchy_priority_only_considers_length_and_head() {
        let a = ForkHierarchy(vec![3, 1]);
        let b = ForkHierarchy(vec![1, 99, 99, 99]);
        assert!(a < b, "shorter hierarchy always has priority");

        let c = ForkHierarchy(vec![5, 0]);
        let d = ForkHierarchy(vec![2, 0]);
        assert!(d < c, "equal length compares by head only");
    }

    #[test]
    fn child_prepends_new_id() {
        let root = ForkHierarchy::root();
        let a = root.child(1);
        let b = a.child(2);
        assert_eq!(b.0, vec![2, 1]);
        assert_eq!(b.creator(), Some(1));
    }

    #[test]
    fn token_order_is_lexicographic() {
        let t1 = Token::new(0x100, ForkHierarchy::root(), TokenType::Func, "a");
        let t2 = Token::new(0x100, ForkHierarchy::root(), TokenType::Func, "b");
        assert!(t1 < t2);
    }
}
