//! `operator new` and the `L2CValue` constructors (§4.4).

use crate::error::ValueError;
use crate::heap::AuxHeap;
use crate::value::{Hash40, L2CValue};

use super::{ImportInterpreter, InterpreterContext};

/// `operator new(n)`: bump-allocates `n` bytes, caching the pointer as
/// `hash_cheat_ptr` when `n` exceeds [`crate::heap::HASH_CHEAT_THRESHOLD`].
pub struct OperatorNew;

impl ImportInterpreter for OperatorNew {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let n = ctx.regs.x(0);
        let ptr = ctx.heap.alloc(ctx.instance_id, n)?;
        if AuxHeap::is_hash_cheat_candidate(n) {
            *ctx.hash_cheat_ptr = Some(ptr);
        }
        ctx.regs.set_x(0, ptr);
        Ok(())
    }
}

/// Records the literal exactly as the caller passed it (§8 scenario 3: the
/// token carries the full `0xBABE0001`-pattern literal, not the post-tag-masked
/// payload `as_integer` would later return).
fn record_literal(ctx: &mut InterpreterContext, literal: u64) {
    ctx.token.args.push(literal);
}

pub struct ConstructBool;

impl ImportInterpreter for ConstructBool {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let literal = ctx.regs.x(1);
        let v = L2CValue::boolean(literal != 0);
        record_literal(ctx, literal);
        ctx.constructed_value = Some(v);
        Ok(())
    }
}

pub struct ConstructInteger;

impl ImportInterpreter for ConstructInteger {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let literal = ctx.regs.x(1);
        let v = L2CValue::integer(literal as i64);
        record_literal(ctx, literal);
        ctx.constructed_value = Some(v);
        Ok(())
    }
}

pub struct ConstructNumber;

impl ImportInterpreter for ConstructNumber {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let f = ctx.regs.s(1);
        let v = L2CValue::number(f);
        ctx.token.fargs.push(f);
        ctx.constructed_value = Some(v);
        Ok(())
    }
}

pub struct ConstructHash;

impl ImportInterpreter for ConstructHash {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let literal = ctx.regs.x(1);
        let h = Hash40::new(literal);
        let v = L2CValue::hash(h);
        record_literal(ctx, literal);
        ctx.constructed_value = Some(v);
        Ok(())
    }
}
