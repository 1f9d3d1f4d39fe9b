//! Import Interpreters (§4.4): per-symbol abstract models of the runtime-library
//! calls the engine intercepts. Each interpreter only ever sees the small
//! register window (`x0..x8`, `s0..s8`) the hook reads before dispatch and the
//! auxiliary per-instance state it needs — never the full emulator — mirroring
//! how the hook itself stays a thin dispatcher around these contracts.

mod accessor;
mod agent;
mod compare;
mod construct;
mod index;
mod stack;

pub use accessor::*;
pub use agent::*;
pub use compare::*;
pub use construct::*;
pub use index::*;
pub use stack::*;

use hashbrown::HashMap;
use std::sync::Arc;

use crate::error::ValueError;
use crate::heap::AuxHeap;
use crate::token::Token;
use crate::value::{Hash40, L2CValue};

/// The register window an import hook reads before dispatch and writes back
/// after (§4.4 step 1 and step 6).
#[derive(Debug, Clone, Default)]
pub struct ImportRegisters {
    pub x: [u64; 9],
    /// fp registers, stored as raw `f32` bits (the low 32 bits of `s0..s8`).
    pub s: [u32; 9],
}

impl ImportRegisters {
    pub fn x(&self, i: usize) -> u64 {
        self.x[i]
    }

    pub fn set_x(&mut self, i: usize, v: u64) {
        self.x[i] = v;
    }

    pub fn s(&self, i: usize) -> f32 {
        f32::from_bits(self.s[i])
    }

    pub fn set_s(&mut self, i: usize, v: f32) {
        self.s[i] = v.to_bits();
    }
}

/// Whether an interpreter requests a fork (§4.4, `operator bool`/`==`/`<=`/`<`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkRequest {
    #[default]
    None,
    /// Parent continues with `x0 = 0`, child gets `x0 = 1` (§4.4).
    DivergeOnBool,
}

/// Everything a per-symbol interpreter needs, borrowed from the Instance and the
/// Cluster Manager's global per-entry-point state for the duration of one call.
pub struct InterpreterContext<'a> {
    pub regs: ImportRegisters,
    pub virtual_stack: &'a mut Vec<L2CValue>,
    pub heap: &'a mut AuxHeap,
    pub function_hashes: &'a mut HashMap<(u64, u64), u64>,
    pub hash_cheat: &'a mut HashMap<Hash40, u64>,
    pub hash_cheat_rev: &'a mut HashMap<u64, Hash40>,
    pub hash_cheat_ptr: &'a mut Option<u64>,
    pub is_basic_emu: bool,
    pub instance_id: u32,
    /// The tentative token the dispatcher built (§4.4 step 3); interpreters may
    /// append to `args`/`fargs` to record the observed literal or argument.
    pub token: &'a mut Token,
    pub fork_requested: ForkRequest,
    /// For `L2CValue::as_*`/`operator[]`/`operator=`/comparison symbols: the
    /// receiver value, already read from its mapped address (§4.3) by the
    /// dispatcher before the interpreter runs.
    pub target_value: Option<L2CValue>,
    /// For binary operators (`operator=`, `operator==`, `operator<=`, `operator<`):
    /// the right-hand-side value.
    pub rhs_value: Option<L2CValue>,
    /// Populated by `L2CAgent::pop_lua_stack`; the dispatcher writes these back
    /// to the caller-supplied buffer at `x8` after the interpreter returns (§4.4).
    pub pop_result: Option<Vec<L2CValue>>,
    /// Populated by the `L2CValue` constructors (§4.4): the value to store at
    /// `this`, i.e. the address already held in `x0` when the hook fired. The
    /// dispatcher writes it through the mapped pointer (§4.3) after the
    /// interpreter returns, the same way it writes back `pop_result`, rather
    /// than clobbering `x0` itself.
    pub constructed_value: Option<L2CValue>,
}

impl<'a> InterpreterContext<'a> {
    pub fn request_fork(&mut self) {
        self.fork_requested = ForkRequest::DivergeOnBool;
    }
}

/// Implemented by each curated per-symbol model of §4.4's table.
pub trait ImportInterpreter: Send + Sync {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError>;
}

/// Builds the curated interpreter registry, keyed by demangled symbol name, the
/// same way the hook dispatch's name string chain does in the source.
pub fn default_interpreter_map() -> HashMap<String, Arc<dyn ImportInterpreter>> {
    let mut map = HashMap::<String, Arc<dyn ImportInterpreter>>::new();

    map.insert("operator new".into(), Arc::new(OperatorNew));
    map.insert("operator new[]".into(), Arc::new(OperatorNew));

    map.insert("L2CAgent::sv_set_function_hash".into(), Arc::new(SvSetFunctionHash));
    map.insert("L2CAgentBase::sv_set_status_func".into(), Arc::new(SvSetStatusFunc));
    map.insert("L2CAgent::clear_lua_stack".into(), Arc::new(ClearLuaStack));

    map.insert("sv_animcmd::is_excute".into(), Arc::new(IsExcute));
    map.insert("sv_animcmd::frame".into(), Arc::new(Frame));

    map.insert("L2CAgent::pop_lua_stack".into(), Arc::new(PopLuaStack));
    map.insert("L2CAgent::push_lua_stack".into(), Arc::new(PushLuaStack));

    map.insert("L2CValue::L2CValue(bool)".into(), Arc::new(ConstructBool));
    map.insert("L2CValue::L2CValue(int)".into(), Arc::new(ConstructInteger));
    map.insert("L2CValue::L2CValue(float)".into(), Arc::new(ConstructNumber));
    map.insert("L2CValue::L2CValue(Hash40)".into(), Arc::new(ConstructHash));

    map.insert("L2CValue::as_bool".into(), Arc::new(AsBool));
    map.insert("L2CValue::as_integer".into(), Arc::new(AsInteger));
    map.insert("L2CValue::as_number".into(), Arc::new(AsNumber));
    map.insert("L2CValue::as_pointer".into(), Arc::new(AsPointer));
    map.insert("L2CValue::as_table".into(), Arc::new(AsTable));
    map.insert("L2CValue::as_inner_function".into(), Arc::new(AsInnerFunction));
    map.insert("L2CValue::as_hash".into(), Arc::new(AsHash));
    map.insert("L2CValue::as_string".into(), Arc::new(AsString));

    map.insert("L2CValue::operator[]".into(), Arc::new(IndexOperator));
    map.insert("L2CValue::operator=".into(), Arc::new(AssignOperator));

    map.insert("L2CValue::operator bool".into(), Arc::new(CompareOperator(CompareKind::Bool)));
    map.insert("L2CValue::operator==".into(), Arc::new(CompareOperator(CompareKind::Eq)));
    map.insert("L2CValue::operator<=".into(), Arc::new(CompareOperator(CompareKind::Le)));
    map.insert("L2CValue::operator<".into(), Arc::new(CompareOperator(CompareKind::Lt)));

    map
}
