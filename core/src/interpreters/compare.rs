//! `L2CValue::operator bool` / `==` / `<=` / `<` (§4.4): the one family of
//! interpreters that can request a fork. In basic-emu mode (`is_basic_emu`) the
//! comparison is evaluated directly instead, since that mode exists precisely to
//! avoid forking for one-shot auxiliary dispatches (§3).

use crate::error::ValueError;

use super::{ImportInterpreter, InterpreterContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareKind {
    Bool,
    Eq,
    Le,
    Lt,
}

pub struct CompareOperator(pub CompareKind);

impl ImportInterpreter for CompareOperator {
    fn interpret(&self, ctx: &mut InterpreterContext) -> Result<(), ValueError> {
        let lhs = ctx
            .target_value
            .ok_or(ValueError::BadAssignment { instance: ctx.instance_id, addr: ctx.regs.x(0) })?;

        if ctx.is_basic_emu {
            let result = match self.0 {
                CompareKind::Bool => lhs.as_bool(),
                CompareKind::Eq | CompareKind::Le | CompareKind::Lt => {
                    let rhs = ctx
                        .rhs_value
                        .ok_or(ValueError::BadAssignment { instance: ctx.instance_id, addr: ctx.regs.x(0) })?;
                    match self.0 {
                        CompareKind::Eq => lhs.raw() == rhs.raw(),
                        CompareKind::Le => lhs.raw() <= rhs.raw(),
                        CompareKind::Lt => lhs.raw() < rhs.raw(),
                        CompareKind::Bool => unreachable!(),
                    }
                }
            };
            ctx.regs.set_x(0, result as u64);
            return Ok(());
        }

        // Parent continues with x0 = 0; the Cluster Manager clones this Instance
        // and sets the child's x0 = 1 on the opposite branch (§4.4, §5).
        ctx.request_fork();
        ctx.regs.set_x(0, 0);
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
    fn basic_emu_mode_evaluates_directly_without_forking() {
        let mut heap = AuxHeap::new(0x1000, 0x100);
        let mut stack = Vec::new();
        let mut fh = HashMap::new();
        let mut hc = HashMap::new();
        let mut hcr = HashMap::new();
        let mut hcp = None;
        let mut token = Token::new(0, ForkHierarchy::root(), TokenType::Func, "L2CValue::operator bool");
        let mut ctx = InterpreterContext {
            regs: Default::default(),
            virtual_stack: &mut stack,
            heap: &mut heap,
            function_hashes: &mut fh,
            hash_cheat: &mut hc,
            hash_cheat_rev: &mut hcr,
            hash_cheat_ptr: &mut hcp,
            is_basic_emu: true,
            instance_id: 0,
            token: &mut token,
            fork_requested: ForkRequest::None,
            target_value: Some(L2CValue::boolean(true)),
            rhs_value: None,
            pop_result: None,
            constructed_value: None,
        };
        CompareOperator(CompareKind::Bool).interpret(&mut ctx).unwrap();
        assert_eq!(ctx.regs.x(0), 1);
        assert_eq!(ctx.fork_requested, ForkRequest::None);
    }

    #[test]
    fn non_basic_emu_requests_fork_with_parent_on_false_path() {
        let mut heap = AuxHeap::new(0x1000, 0x100);
        let mut stack = Vec::new();
        let mut fh = HashMap::new();
        let mut hc = HashMap::new();
        let mut hcr = HashMap::new();
        let mut hcp = None;
        let mut token = Token::new(0, ForkHierarchy::root(), TokenType::Func, "L2CValue::operator==");
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
            fork_requested: ForkRequest::None,
            target_value: Some(L2CValue::integer(1)),
            rhs_value: Some(L2CValue::integer(1)),
            pop_result: None,
            constructed_value: None,
        };
        CompareOperator(CompareKind::Eq).interpret(&mut ctx).unwrap();
        assert_eq!(ctx.regs.x(0), 0);
        assert_eq!(ctx.fork_requested, ForkRequest::DivergeOnBool);
    }
}
