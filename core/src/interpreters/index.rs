//! `L2CValue::operator[](Hash40)` and `L2CValue::operator=(const&)` (§4.4): the
//! hash-indexed table store. Together these model `agent[hash("k")] = v` (§8
//! scenario 5) without ever materializing a real hash table in the emulator.

use crate::error::ValueError;
use crate::value::Hash40;

use super::{ImportInterpreter, InterpreterContext};

/// Memoizes a per-hash synthetic pointer so that a later assignment through it
/// can be traced back to the hash that produced it.
pub struct IndexOperator;

impl ImportInterpreter for IndexOperator {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let h = Hash40::new(ctx.regs.x(1));
        ctx.token.args.push(h.raw());

        let ptr = if let Some(&p) = ctx.hash_cheat.get(&h) {
            p
        } else {
            let p = ctx.heap.alloc(ctx.instance_id, 8)?;
            ctx.hash_cheat.insert(h, p);
            ctx.hash_cheat_rev.insert(p, h);
            p
        };
        ctx.regs.set_x(0, ptr);
        Ok(())
    }
}

/// Copy-assigns `rhs` into the receiver. When the receiver address is a
/// synthetic hash pointer previously returned by [`IndexOperator`], also
/// records `function_hashes[(hash_cheat_ptr, h)] = rhs.raw()` (§4.4, §8 scenario 5).
pub struct AssignOperator;

impl ImportInterpreter for AssignOperator {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let target_addr = ctx.regs.x(0);
        let rhs = ctx
            .rhs_value
            .ok_or(ValueError::BadAssignment { instance: ctx.instance_id, addr: target_addr })?;

        if let Some(&h) = ctx.hash_cheat_rev.get(&target_addr) {
            if let Some(agent_ptr) = *ctx.hash_cheat_ptr {
                ctx.function_hashes.insert((agent_ptr, h.raw()), rhs.raw());
            } else {
                log::warn!(
                    "instance {}: bad L2CValue assignment at {:#x}: no cached agent pointer for hash-indexed store",
                    ctx.instance_id,
                    target_addr
                );
            }
        }
        ctx.regs.set_x(0, rhs.raw());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::AuxHeap;
    use crate::interpreters::ForkRequest;
    use crate::token::{ForkHierarchy, Token, TokenType};
    use crate::value::L2CValue;
    use hashbrown::HashMap;

    #[test]
    fn indexed_assignment_records_function_hash() {
        let mut heap = AuxHeap::new(0x1000, 0x1000);
        let mut stack = Vec::new();
        let mut fh = HashMap::new();
        let mut hc = HashMap::new();
        let mut hcr = HashMap::new();
        let mut hcp = Some(0x5000); // the cached "agent" pointer from a prior large new()
        let mut token = Token::new(0, ForkHierarchy::root(), TokenType::Func, "L2CValue::operator[]");

        let h = Hash40::new(0xABCDEF);
        let mut regs = super::super::ImportRegisters::default();
        regs.set_x(1, h.raw());
        {
            let mut ctx = InterpreterContext {
                regs,
                virtual_stack: &mut stack,
                heap: &mut heap,
                function_hashes: &mut fh,
                hash_cheat: &mut hc,
                hash_cheat_rev: &mut hcr,
                hash_cheat_ptr: &mut hcp,
                is_basic_emu: false,
                instance_id: 0,
                token: &mut token,
                fork_requested: ForkRequest::None,
                target_value: None,
                rhs_value: None,
                pop_result: None,
                constructed_value: None,
            };
            IndexOperator.interpret(&mut ctx).unwrap();
        }
        let synthetic_ptr = hcr.keys().next().copied().unwrap();

        let rhs = L2CValue::pointer(0xCAFE);
        let mut regs2 = super::super::ImportRegisters::default();
        regs2.set_x(0, synthetic_ptr);
        let mut token2 = Token::new(0, ForkHierarchy::root(), TokenType::Func, "L2CValue::operator=");
        let mut ctx2 = InterpreterContext {
            regs: regs2,
            virtual_stack: &mut stack,
            heap: &mut heap,
            function_hashes: &mut fh,
            hash_cheat: &mut hc,
            hash_cheat_rev: &mut hcr,
            hash_cheat_ptr: &mut hcp,
            is_basic_emu: false,
            instance_id: 0,
            token: &mut token2,
            fork_requested: ForkRequest::None,
            target_value: None,
            rhs_value: Some(rhs),
            pop_result: None,
            constructed_value: None,
        };
        AssignOperator.interpret(&mut ctx2).unwrap();

        assert_eq!(fh.get(&(0x5000, h.raw())), Some(&0xCAFE));
    }
}
