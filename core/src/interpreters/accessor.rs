//! `L2CValue::as_{bool,integer,number,pointer,table,inner_function,hash,string}`
//! (§4.4): read the receiver value, place the result in `x0`/`s0`, and copy it
//! into the token.

use crate::error::ValueError;

use super::{ImportInterpreter, InterpreterContext};

fn receiver(ctx: &InterpreterContext) -> Result<crate::value::L2CValue, ValueError> {
    ctx.target_value.ok_or(ValueError::BadAssignment { instance: ctx.instance_id, addr: ctx.regs.x(0) })
}

pub struct AsBool;
impl ImportInterpreter for AsBool {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = receiver(ctx)?.as_bool();
        ctx.token.args.push(v as u64);
        ctx.regs.set_x(0, v as u64);
        Ok(())
    }
}

pub struct AsInteger;
impl ImportInterpreter for AsInteger {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = receiver(ctx)?.as_integer();
        ctx.token.args.push(v as u64);
        ctx.regs.set_x(0, v as u64);
        Ok(())
    }
}

pub struct AsNumber;
impl ImportInterpreter for AsNumber {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = receiver(ctx)?.as_number();
        ctx.token.fargs.push(v);
        ctx.regs.set_s(0, v);
        Ok(())
    }
}

pub struct AsPointer;
impl ImportInterpreter for AsPointer {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = receiver(ctx)?.as_pointer();
        ctx.token.args.push(v);
        ctx.regs.set_x(0, v);
        Ok(())
    }
}

pub struct AsTable;
impl ImportInterpreter for AsTable {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = receiver(ctx)?.as_table();
        ctx.token.args.push(v);
        ctx.regs.set_x(0, v);
        Ok(())
    }
}

pub struct AsInnerFunction;
impl ImportInterpreter for AsInnerFunction {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = receiver(ctx)?.as_inner_function();
        ctx.token.args.push(v);
        ctx.regs.set_x(0, v);
        Ok(())
    }
}

/// Preserved quirk (§9): returns the low 40 bits for both `Hash` and `Integer`
/// receivers, conflating the two variants at call sites that forward through it.
pub struct AsHash;
impl ImportInterpreter for AsHash {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = receiver(ctx)?.as_hash();
        ctx.token.args.push(v.raw());
        ctx.regs.set_x(0, v.raw());
        Ok(())
    }
}

pub struct AsString;
impl ImportInterpreter for AsString {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = receiver(ctx)?.as_string();
        ctx.token.args.push(v);
        ctx.regs.set_x(0, v);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::AuxHeap;
    use crate::token::{ForkHierarchy, Token, TokenType};
    use crate::value::{Hash40, L2CValue};
    use hashbrown::HashMap;

    fn base_ctx(target: L2CValue) -> (Token, AuxHeap, Vec<L2CValue>, HashMap<(u64, u64), u64>, HashMap<Hash40, u64>, HashMap<u64, Hash40>, Option<u64>) {
        let token = Token::new(0, ForkHierarchy::root(), TokenType::Func, "L2CValue::as_hash");
        let heap = AuxHeap::new(0x1000, 0x100);
        let _ = target;
        (token, heap, Vec::new(), HashMap::new(), HashMap::new(), HashMap::new(), None)
    }

    #[test]
    fn as_hash_conflates_integer_and_hash() {
        let target = L2CValue::integer(0xBEEF_u64 as i64);
        let (mut token, mut heap, mut stack, mut fh, mut hc, mut hcr, mut hcp) = base_ctx(target);
        let mut ctx = InterpreterContext {
            regs: Default::default(),
            virtual_stack: &mut stack,
            heap: &mut heap,
            function_hashes: &mut fh,
            hash_cheat: &mut hc,
            hash_cheat_rev: &mut hcr,
            hash_cheat_ptr: &mut hcp,
            is_basic_emu: false,
            instance_id: 0,
            token: &mut token,
            fork_requested: super::super::ForkRequest::None,
            target_value: Some(target),
            rhs_value: None,
            pop_result: None,
            constructed_value: None,
        };
        AsHash.interpret(&mut ctx).unwrap();
        assert_eq!(ctx.regs.x(0), 0xBEEF);
    }
}
