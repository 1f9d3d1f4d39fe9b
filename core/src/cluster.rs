//! The Cluster Manager (§4, §5): owns every live Instance for one entry-point,
//! the shared Token Store and Block Graph, and the global per-entry-point maps
//! (`function_hashes`, `hash_cheat*`) the source kept as process-wide statics
//! (§9). Drives the single-threaded cooperative round-robin loop and the
//! import-hook dispatch sequence (§4.4).

use hashbrown::HashMap;
use std::sync::Arc;

use crate::block::{BlockGraph, BlockType};
use crate::cpu::{EmulatorAdapter, Register, AUX_HEAP_BASE, AUX_HEAP_SIZE, MAGIC_IMPORT, STACK_BASE, STACK_SIZE};
use crate::error::ClusterError;
use crate::heap::AuxHeap;
use crate::imports::ImportTable;
use crate::instance::Instance;
use crate::interpreters::{default_interpreter_map, ForkRequest, ImportInterpreter, ImportRegisters, InterpreterContext};
use crate::store::{ConvergenceOutcome, TokenStore};
use crate::token::{meta_tag, ForkHierarchy, Token, TokenType};
use crate::value::{Hash40, L2CValue};

/// Summary logged at `info` when an entry-point analysis completes (§10).
#[derive(Debug, Clone, Copy)]
pub struct EntrySummary {
    pub entry: u64,
    pub blocks: usize,
    pub tokens: usize,
    pub instances_spawned: u32,
}

pub struct ClusterManager<A: EmulatorAdapter + Clone> {
    instances: Vec<Instance<A>>,
    next_instance_id: u32,
    imports: ImportTable,
    interpreters: HashMap<String, Arc<dyn ImportInterpreter>>,
    store: TokenStore,
    blocks: BlockGraph,
    function_hashes: HashMap<(u64, u64), u64>,
    hash_cheat: HashMap<Hash40, u64>,
    hash_cheat_rev: HashMap<u64, Hash40>,
    hash_cheat_ptr: Option<u64>,
    instances_spawned: u32,
}

fn read_import_registers<A: EmulatorAdapter>(emu: &A) -> ImportRegisters {
    let mut regs = ImportRegisters::default();
    for i in 0..9u8 {
        regs.set_x(i as usize, emu.read_reg(Register::X(i)));
        regs.set_s(i as usize, f32::from_bits(emu.read_reg(Register::S(i)) as u32));
    }
    regs
}

fn write_import_registers<A: EmulatorAdapter>(emu: &mut A, regs: &ImportRegisters) {
    for i in 0..9u8 {
        emu.write_reg(Register::X(i), regs.x(i as usize));
        emu.write_reg(Register::S(i), regs.s(i as usize).to_bits() as u64);
    }
}

/// Which registers hold pointers to `L2CValue` objects that must be preloaded
/// before the interpreter runs (§4.4 step 1). Grounded in the Itanium member-call
/// ABI: `x0` is `this` for receiver-style calls, `x1` the by-reference argument
/// for binary operators, and the single value argument of `push_lua_stack`.
fn preload_values<A: EmulatorAdapter>(name: &str, emu: &A, regs: &ImportRegisters) -> (Option<L2CValue>, Option<L2CValue>) {
    match name {
        "L2CValue::as_bool"
        | "L2CValue::as_integer"
        | "L2CValue::as_number"
        | "L2CValue::as_pointer"
        | "L2CValue::as_table"
        | "L2CValue::as_inner_function"
        | "L2CValue::as_hash"
        | "L2CValue::as_string"
        | "L2CValue::operator bool" => (L2CValue::read_at(emu, regs.x(0)).ok(), None),

        "L2CValue::operator==" | "L2CValue::operator<=" | "L2CValue::operator<" => {
            (L2CValue::read_at(emu, regs.x(0)).ok(), L2CValue::read_at(emu, regs.x(1)).ok())
        }

        "L2CValue::operator=" => (None, L2CValue::read_at(emu, regs.x(1)).ok()),

        "L2CAgent::push_lua_stack" => (L2CValue::read_at(emu, regs.x(1)).ok(), None),

        _ => (None, None),
    }
}

impl<A: EmulatorAdapter + Clone> ClusterManager<A> {
    pub fn new(imports: ImportTable) -> Self {
        Self {
            instances: Vec::new(),
            next_instance_id: 0,
            imports,
            interpreters: default_interpreter_map(),
            store: TokenStore::new(),
            blocks: BlockGraph::new(),
            function_hashes: HashMap::new(),
            hash_cheat: HashMap::new(),
            hash_cheat_rev: HashMap::new(),
            hash_cheat_ptr: None,
            instances_spawned: 0,
        }
    }

    pub fn imports(&self) -> &ImportTable {
        &self.imports
    }

    pub fn imports_mut(&mut self) -> &mut ImportTable {
        &mut self.imports
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.store
    }

    pub fn blocks(&self) -> &BlockGraph {
        &self.blocks
    }

    pub fn function_hashes(&self) -> &HashMap<(u64, u64), u64> {
        &self.function_hashes
    }

    /// Clears everything scoped to a single entry-point's analysis (§9): the
    /// Import Table survives across calls since symbol <-> slot assignments are
    /// per-binary, not per-entry-point; the driver owns sequencing this (§6).
    pub fn reset_entry_point(&mut self) {
        self.instances.clear();
        self.store.clear();
        self.blocks.clear();
        self.function_hashes.clear();
        self.hash_cheat.clear();
        self.hash_cheat_rev.clear();
        self.hash_cheat_ptr = None;
        self.instances_spawned = 0;
    }

    /// Seeds one root Instance at `entry` with `args` in `x0..x7`, then runs the
    /// cooperative round-robin loop (§5) to completion. Mirrors the driver
    /// collaborator interface of §6.
    pub fn run_entry(&mut self, entry: u64, mut emu: A, basic_emu: bool, args: [u64; 8]) -> Result<EntrySummary, ClusterError> {
        for (i, &a) in args.iter().enumerate() {
            emu.write_reg(Register::X(i as u8), a);
        }
        emu.write_reg(Register::Sp, STACK_BASE + STACK_SIZE);
        emu.write_reg(Register::Pc, entry);

        let heap = AuxHeap::new(AUX_HEAP_BASE, AUX_HEAP_SIZE);
        let root_id = self.next_instance_id;
        self.next_instance_id += 1;
        self.instances_spawned += 1;
        self.instances.push(Instance::new_root(root_id, emu, heap, entry, basic_emu));
        self.blocks.get_or_create(entry, BlockType::Subroutine, ForkHierarchy::root());

        let mut cursor = 0usize;
        while !self.instances.is_empty() {
            if cursor >= self.instances.len() {
                cursor = 0;
            }
            let alive = self.step_instance(cursor)?;
            if !alive {
                self.instances.remove(cursor);
                continue;
            }
            cursor += 1;
        }

        self.blocks.clean_blocks(entry, self.store.as_map_mut());

        let summary = EntrySummary {
            entry,
            blocks: self.blocks.len(),
            tokens: self.store.all_blocks().map(|(_, set)| set.len()).sum(),
            instances_spawned: self.instances_spawned,
        };
        log::info!(
            "entry {:#x}: blocks={} tokens={} instances_spawned={}",
            summary.entry,
            summary.blocks,
            summary.tokens,
            summary.instances_spawned
        );
        Ok(summary)
    }

    /// Advances one Instance until its next suspension point (§5). Returns
    /// `Ok(false)` when the Instance should be dropped (terminated, converged,
    /// hung, or returned), `Ok(true)` to keep scheduling it.
    fn step_instance(&mut self, idx: usize) -> Result<bool, ClusterError> {
        use crate::cpu::StopReason;

        let id = self.instances[idx].id;
        let reason = self.instances[idx].emu.run_until_suspend();
        match reason {
            StopReason::ImportHook { slot } => {
                log::debug!("instance {id}: import hook at slot {slot:#x}");
                self.dispatch_import_hook(idx, slot)
            }
            StopReason::MagicImport => {
                log::trace!("instance {id}: magic import landing");
                Ok(true)
            }
            StopReason::Hang { pc } => {
                log::warn!("instance {id}: hang detected at {pc:#x}");
                self.instances[idx].terminate();
                Ok(false)
            }
            StopReason::InvalidRead { addr } => {
                log::warn!("instance {id}: invalid read at {addr:#x}, terminating instance");
                self.instances[idx].terminate();
                Ok(false)
            }
            StopReason::InvalidWrite { addr } => Err(ClusterError::FatalInvalidWrite { instance: id, addr }),
            StopReason::Returned => {
                log::debug!("instance {id}: returned");
                self.instances[idx].terminate();
                Ok(false)
            }
        }
    }

    /// The import-hook dispatch sequence of §4.4, steps 1-6.
    fn dispatch_import_hook(&mut self, idx: usize, slot: u64) -> Result<bool, ClusterError> {
        let name = self.imports.name_of_checked(slot)?.to_string();
        let regs = read_import_registers(&self.instances[idx].emu);
        let (target_value, rhs_value) = preload_values(&name, &self.instances[idx].emu, &regs);

        let origin = {
            let instance = &self.instances[idx];
            instance.origin().or(instance.start_addr).unwrap_or(instance.last_block)
        };

        let candidate = Token::new(origin, self.instances[idx].fork_hierarchy.clone(), TokenType::Func, name.clone());
        let converge_set = self.blocks.is_converge_point(origin);
        let (has_parent, has_start, outputted, last_block) = {
            let instance = &self.instances[idx];
            (instance.has_parent(), instance.start_addr.is_some(), instance.outputted_tokens, instance.last_block)
        };

        let mut token = match self.store.check_convergence(candidate, has_parent, has_start, converge_set, outputted, last_block) {
            ConvergenceOutcome::Converged { token } => {
                if let Some(t) = token {
                    self.store.add_subreplace(last_block, t);
                }
                log::debug!("instance {}: converged at {origin:#x}", self.instances[idx].id);
                self.instances[idx].terminate();
                return Ok(false);
            }
            ConvergenceOutcome::Proceed(t) => t,
        };

        let interpreter = self.interpreters.get(&name).cloned();
        let instance_id = self.instances[idx].id;
        let is_basic_emu = self.instances[idx].is_basic_emu;

        let Self { instances, function_hashes, hash_cheat, hash_cheat_rev, hash_cheat_ptr, .. } = self;
        let instance = &mut instances[idx];
        let mut ctx = InterpreterContext {
            regs,
            virtual_stack: &mut instance.virtual_stack,
            heap: &mut instance.heap,
            function_hashes,
            hash_cheat,
            hash_cheat_rev,
            hash_cheat_ptr,
            is_basic_emu,
            instance_id,
            token: &mut token,
            fork_requested: ForkRequest::None,
            target_value,
            rhs_value,
            pop_result: None,
            constructed_value: None,
        };

        match &interpreter {
            Some(interp) => {
                if let Err(err) = interp.interpret(&mut ctx) {
                    log::warn!("instance {instance_id}: {name} failed: {err}");
                }
            }
            None => log::debug!("instance {instance_id}: unmodeled import {name}, recording bare call"),
        }

        let fork_requested = ctx.fork_requested;
        let pop_result = ctx.pop_result.take();
        let constructed_value = ctx.constructed_value.take();
        let regs_after = ctx.regs.clone();

        write_import_registers(&mut instance.emu, &regs_after);
        if let Some(popped) = pop_result {
            let buf_addr = regs_after.x(8);
            for (i, v) in popped.into_iter().enumerate() {
                let addr = buf_addr + (i as u64) * 16;
                if let Err(err) = v.write_at(&mut instance.emu, addr) {
                    log::warn!("instance {instance_id}: failed to write pop_lua_stack result at {addr:#x}: {err}");
                }
            }
        }
        if let Some(v) = constructed_value {
            let this_addr = regs_after.x(0);
            if let Err(err) = v.write_at(&mut instance.emu, this_addr) {
                log::warn!("instance {instance_id}: failed to write constructed L2CValue at {this_addr:#x}: {err}");
            }
        }
        instance.emu.write_reg(Register::Pc, MAGIC_IMPORT);

        self.blocks.mark_converge_point(origin);

        if fork_requested == ForkRequest::DivergeOnBool {
            self.fork_on_branch(idx, origin)?;
        } else {
            self.instances[idx].inc_outputted_tokens();
            self.store.add_subreplace(self.instances[idx].last_block, token);
        }

        Ok(true)
    }

    /// Builds the child Instance for a `DivergeOnBool` request (§4.4, §5): the
    /// parent already has `x0 = 0` written back; the child is a snapshot clone
    /// with `x0 = 1`. Emits `DIV_FALSE`/`DIV_TRUE` in place of the generic Func
    /// token, since the branch outcome — not the comparison call itself — is
    /// what the token stream records (§8 scenario 4).
    ///
    /// Real branch-target addresses require decoding the taken AArch64 branch,
    /// which is outside this engine's scope (the emulator is an opaque
    /// collaborator, §1). The parent's continuation is modeled as the
    /// instruction-width fallthrough `origin + 4`; the child's as a synthetic
    /// address derived from its fork id, guaranteeing the two targets are
    /// always distinct and deterministic without guessing at real displacement.
    fn fork_on_branch(&mut self, idx: usize, origin: u64) -> Result<(), ClusterError> {
        let child_id = self.next_instance_id;
        self.next_instance_id += 1;
        self.instances_spawned += 1;

        let child_emu = self.instances[idx].emu.clone();
        let mut child = self.instances[idx].fork(child_id, child_emu);
        child.emu.write_reg(Register::X(0), 1);

        let parent_hierarchy = self.instances[idx].fork_hierarchy.clone();
        let child_hierarchy = child.fork_hierarchy.clone();

        let false_target = origin.wrapping_add(4);
        let true_target = origin.wrapping_add(0x10_0000).wrapping_add(child_id as u64);

        self.blocks.get_or_create(false_target, BlockType::Fork, parent_hierarchy.clone());
        self.blocks.get_or_create(true_target, BlockType::Fork, child_hierarchy.clone());

        let parent_block = self.instances[idx].last_block;
        self.instances[idx].last_block = false_target;
        child.last_block = true_target;

        let parent_token = Token::meta(origin, parent_hierarchy, meta_tag::DIV_FALSE, vec![false_target]);
        let child_token = Token::meta(origin, child_hierarchy, meta_tag::DIV_TRUE, vec![true_target]);

        self.store.add_subreplace(parent_block, parent_token);
        self.instances[idx].inc_outputted_tokens();

        self.store.add_subreplace(parent_block, child_token);
        child.inc_outputted_tokens();

        self.instances.push(child);
        log::debug!("instance {}: forked to instance {child_id} at {origin:#x}", self.instances[idx].id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{ScriptedStep, StopReason, StubAdapter};

    fn table_with(names: &[&str]) -> ImportTable {
        let mut table = ImportTable::new();
        for n in names {
            table.allocate_slot(*n).unwrap();
        }
        table
    }

    #[test]
    fn entry_point_returning_immediately_yields_one_block_zero_tokens() {
        let table = table_with(&[]);
        let mut mgr: ClusterManager<StubAdapter> = ClusterManager::new(table);
        let emu = StubAdapter::new(vec![]);
        let summary = mgr.run_entry(0x8000, emu, false, [0; 8]).unwrap();
        assert_eq!(summary.blocks, 1);
        assert_eq!(summary.tokens, 0);
        assert_eq!(summary.instances_spawned, 1);
    }

    #[test]
    fn single_is_excute_call_then_return_records_one_func_token() {
        let mut table = table_with(&[]);
        let slot = table.allocate_slot("sv_animcmd::is_excute").unwrap();
        let mut mgr: ClusterManager<StubAdapter> = ClusterManager::new(table);

        let script = vec![
            ScriptedStep { pc: 0x8000, reason: StopReason::ImportHook { slot }, next_pc: MAGIC_IMPORT },
            ScriptedStep { pc: MAGIC_IMPORT, reason: StopReason::MagicImport, next_pc: 0x9000 },
        ];
        let emu = StubAdapter::new(script);
        let summary = mgr.run_entry(0x8000, emu, false, [0; 8]).unwrap();

        assert_eq!(summary.tokens, 1);
        let set = mgr.tokens().block_tokens(0x8000).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().str, "sv_animcmd::is_excute");
    }

    #[test]
    fn hang_terminates_instance_and_manager_completes() {
        let table = table_with(&[]);
        let mut mgr: ClusterManager<StubAdapter> = ClusterManager::new(table);
        // A self-looping MagicImport step keeps pc at 0x8000 across calls, so
        // the hang detector's three-consecutive-pc rule fires on the third.
        let script = vec![ScriptedStep { pc: 0x8000, reason: StopReason::MagicImport, next_pc: 0x8000 }];
        let emu = StubAdapter::new(script);
        let summary = mgr.run_entry(0x8000, emu, false, [0; 8]).unwrap();
        assert_eq!(summary.instances_spawned, 1);
        assert_eq!(summary.tokens, 0);
    }
}
