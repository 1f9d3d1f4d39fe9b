//! `L2CAgent`/`L2CAgentBase` bookkeeping calls (§4.4): registering a routine
//! under a hash key, and clearing the virtual Lua-style stack between script
//! invocations.

use crate::error::ValueError;

use super::{ImportInterpreter, InterpreterContext};

/// `L2CAgent::sv_set_function_hash(a, h)`: `function_hashes[(x0, h)] = a`.
pub struct SvSetFunctionHash;

impl ImportInterpreter for SvSetFunctionHash {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let agent = ctx.regs.x(0);
        let a = ctx.regs.x(1);
        let h = ctx.regs.x(2);
        ctx.function_hashes.insert((agent, h), a);
        ctx.token.args.extend_from_slice(&[h, a]);
        Ok(())
    }
}

/// `L2CAgentBase::sv_set_status_func(u, v, p)`:
/// `function_hashes[(x0, (u.raw << 32) | v.raw)] = p`.
pub struct SvSetStatusFunc;

impl ImportInterpreter for SvSetStatusFunc {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let agent = ctx.regs.x(0);
        let u = ctx.regs.x(1);
        let v = ctx.regs.x(2);
        let p = ctx.regs.x(3);
        let key = (u << 32) | (v & 0xFFFF_FFFF);
        ctx.function_hashes.insert((agent, key), p);
        ctx.token.args.extend_from_slice(&[key, p]);
        Ok(())
    }
}

/// `L2CAgent::clear_lua_stack()`.
pub struct ClearLuaStack;

impl ImportInterpreter for ClearLuaStack {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        ctx.virtual_stack.clear();
        Ok(())
    }
}
