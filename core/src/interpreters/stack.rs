//! `sv_animcmd::is_excute`/`sv_animcmd::frame` and the `L2CAgent` virtual-stack
//! push/pop pair (§4.4). The virtual stack here is the engine's own stand-in for
//! the Lua-style value stack the real agent keeps in its C++ runtime; none of
//! these interpreters touch emulator memory directly except through the
//! caller-supplied buffer address `pop_lua_stack` is told to write into.

use crate::error::ValueError;
use crate::value::{L2CValue, L2CValueType};

use super::{ImportInterpreter, InterpreterContext};

/// `sv_animcmd::is_excute(_)`: always reports the animcmd line as executing.
pub struct IsExcute;

impl ImportInterpreter for IsExcute {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = L2CValue::boolean(true);
        ctx.virtual_stack.push(v);
        ctx.token.args.push(v.raw());
        ctx.regs.set_x(0, 1);
        Ok(())
    }
}

/// `sv_animcmd::frame(_, f)`: records the frame argument and, like `is_excute`,
/// always reports the line as executing.
pub struct Frame;

impl ImportInterpreter for Frame {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let f = ctx.regs.s(1);
        ctx.virtual_stack.push(L2CValue::boolean(true));
        ctx.token.fargs.push(f);
        ctx.regs.set_x(0, 1);
        Ok(())
    }
}

/// `L2CAgent::pop_lua_stack(n)`: pops up to `n` values off the virtual stack,
/// oldest-popped-first, for the dispatcher to write into the buffer at `x8`
/// after this interpreter returns. An under-flow is recoverable (§7): the
/// missing slots are padded with default-constructed (`void`) values and a
/// warning is logged, rather than failing the call.
pub struct PopLuaStack;

impl ImportInterpreter for PopLuaStack {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let n = ctx.regs.x(1) as usize;
        let available = ctx.virtual_stack.len();
        if available < n {
            log::warn!(
                "instance {}: pop_lua_stack underflow: requested {} values, {} available",
                ctx.instance_id,
                n,
                available
            );
        }

        let mut popped = Vec::with_capacity(n);
        for _ in 0..n {
            popped.push(ctx.virtual_stack.pop().unwrap_or_else(L2CValue::void));
        }
        popped.reverse();

        ctx.token.args.push(n as u64);
        ctx.pop_result = Some(popped);
        Ok(())
    }
}

/// `L2CAgent::push_lua_stack(v)`: pushes the value the dispatcher already read
/// into `target_value` (§4.3) and records its payload by kind.
pub struct PushLuaStack;

impl ImportInterpreter for PushLuaStack {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let v = ctx
            .target_value
            .ok_or(ValueError::BadAssignment { instance: ctx.instance_id, addr: ctx.regs.x(0) })?;

        match v.ty() {
            L2CValueType::Number => ctx.token.fargs.push(v.as_number()),
            _ => ctx.token.args.push(v.raw()),
        }
        ctx.virtual_stack.push(v);
        Ok(())
    }
}
