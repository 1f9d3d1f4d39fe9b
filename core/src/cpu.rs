//! The Emulator Adapter (§4.1): a thin, uniform wrapper contract over whatever
//! AArch64 CPU emulator actually executes the binary. The core engine depends
//! only on [`EmulatorAdapter`]; no instruction decoder lives in this crate.
//!
//! [`StubAdapter`] is a deterministic, scripted implementation used by the test
//! suite to exercise the Instance/Cluster Manager/Token Store rules without a
//! real AArch64 core.

use hashbrown::HashMap;

use crate::error::EmulatorError;

/// Fixed memory layout (§6). A real loader places the binary at `NRO_BASE`; the
/// engine itself only cares that the regions below don't overlap.
pub const NRO_BASE: u64 = 0x0000_0800_0000_0000;
pub const IMPORTS_BASE: u64 = 0x0000_0900_0000_0000;
pub const SLOT_SIZE: u64 = 0x200;
pub const AUX_HEAP_BASE: u64 = 0x0000_0A00_0000_0000;
pub const AUX_HEAP_SIZE: u64 = 0x1000_0000;
pub const STACK_BASE: u64 = 0x0000_0B00_0000_0000;
pub const STACK_SIZE: u64 = 0x0010_0000;
pub const STACK_END: u64 = STACK_BASE + STACK_SIZE;
/// Reserved, never-mapped PC written after every import hook (§4.1) so the
/// emulator stops cleanly between hooks.
pub const MAGIC_IMPORT: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// An AArch64 register, addressable by the interpreters of §4.4 (`x0..x8`,
/// `s0..s8`) and the adapter's snapshot/restore machinery (the full file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// General-purpose registers x0..x28 (x29/fp and x30/lr are separate below,
    /// matching the register set read by the original hook's `uc_read_reg_state`).
    X(u8),
    Fp,
    Lr,
    Sp,
    Pc,
    /// Vector/fp registers s0..s31, read/written as raw bits.
    S(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemPerms {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl MemPerms {
    pub const RWX: Self = Self { read: true, write: true, exec: true };
    pub const RW: Self = Self { read: true, write: true, exec: false };
    pub const RX: Self = Self { read: true, write: false, exec: true };
}

/// Why a call to [`EmulatorAdapter::run_until_suspend`] returned control to the
/// Cluster Manager (§5 suspension points).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Control reached an import slot; `slot` is the address entered.
    ImportHook { slot: u64 },
    /// Control reached [`MAGIC_IMPORT`] (the post-hook landing sentinel).
    MagicImport,
    /// The hang detector observed the same `pc` for three consecutive instructions.
    Hang { pc: u64 },
    InvalidRead { addr: u64 },
    InvalidWrite { addr: u64 },
    /// Control returned to [`STACK_END`]: a normal top-level return, not an error.
    Returned,
}

/// Uniform wrapper over the underlying CPU emulator (§4.1). `Snapshot` is an
/// opaque, cloneable capture of everything a fork needs to restore (§5).
pub trait EmulatorAdapter {
    type Snapshot: Clone;

    fn snapshot(&self) -> Self::Snapshot;
    fn restore(&mut self, snapshot: Self::Snapshot);

    fn read_reg(&self, reg: Register) -> u64;
    fn write_reg(&mut self, reg: Register, value: u64);

    fn read_mem(&self, addr: u64, len: usize) -> Result<Vec<u8>, EmulatorError>;
    fn write_mem(&mut self, addr: u64, bytes: &[u8]) -> Result<(), EmulatorError>;

    fn map_region(&mut self, base: u64, len: u64, perms: MemPerms);

    /// Runs until the next suspension point (§5).
    fn run_until_suspend(&mut self) -> StopReason;
}

/// One scripted instruction for [`StubAdapter`]: "when control is at `pc`, do
/// this and report that stop reason".
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    pub pc: u64,
    pub reason: StopReason,
    /// pc to resume at after this step is consumed (simulates straight-line
    /// execution or a taken branch).
    pub next_pc: u64,
}

/// A deterministic, non-decoding stand-in for a real AArch64 core, driven by a
/// fixed table of [`ScriptedStep`]s rather than actual instruction fetch/decode.
/// Exists purely so the engine's Instance/Cluster Manager/Token Store logic can
/// be exercised end to end without depending on a real emulator crate.
#[derive(Debug, Clone)]
pub struct StubAdapter {
    regs: HashMap<Register, u64>,
    mem: HashMap<u64, u8>,
    script: Vec<ScriptedStep>,
    last_two_pcs: [u64; 2],
}

#[derive(Debug, Clone)]
pub struct StubSnapshot {
    regs: HashMap<Register, u64>,
    mem: HashMap<u64, u8>,
    last_two_pcs: [u64; 2],
}

impl StubAdapter {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self { regs: HashMap::new(), mem: HashMap::new(), script, last_two_pcs: [u64::MAX, u64::MAX] }
    }
}

impl EmulatorAdapter for StubAdapter {
    type Snapshot = StubSnapshot;

    fn snapshot(&self) -> Self::Snapshot {
        StubSnapshot {
            regs: self.regs.clone(),
            mem: self.mem.clone(),
            last_two_pcs: self.last_two_pcs,
        }
    }

    fn restore(&mut self, snapshot: Self::Snapshot) {
        self.regs = snapshot.regs;
        self.mem = snapshot.mem;
        self.last_two_pcs = snapshot.last_two_pcs;
    }

    fn read_reg(&self, reg: Register) -> u64 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn write_reg(&mut self, reg: Register, value: u64) {
        self.regs.insert(reg, value);
    }

    fn read_mem(&self, addr: u64, len: usize) -> Result<Vec<u8>, EmulatorError> {
        (0..len as u64).map(|i| self.mem.get(&(addr + i)).copied().ok_or(EmulatorError::Unmapped { instance: 0, addr })).collect()
    }

    fn write_mem(&mut self, addr: u64, bytes: &[u8]) -> Result<(), EmulatorError> {
        for (i, &b) in bytes.iter().enumerate() {
            self.mem.insert(addr + i as u64, b);
        }
        Ok(())
    }

    fn map_region(&mut self, _base: u64, _len: u64, _perms: MemPerms) {}

    fn run_until_suspend(&mut self) -> StopReason {
        let pc = self.read_reg(Register::Pc);
        let hang = self.last_two_pcs[0] == pc && self.last_two_pcs[1] == pc;
        self.last_two_pcs = [self.last_two_pcs[1], pc];
        if hang {
            return StopReason::Hang { pc };
        }
        let Some(step) = self.script.iter().find(|s| s.pc == pc) else {
            return StopReason::Returned;
        };
        self.write_reg(Register::Pc, step.next_pc);
        step.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hang_detector_fires_on_third_repeated_pc() {
        let mut adapter = StubAdapter::new(vec![]);
        adapter.write_reg(Register::Pc, 0x1000);
        assert_eq!(adapter.run_until_suspend(), StopReason::Returned);
        adapter.write_reg(Register::Pc, 0x1000);
        assert_eq!(adapter.run_until_suspend(), StopReason::Returned);
        adapter.write_reg(Register::Pc, 0x1000);
        assert_eq!(adapter.run_until_suspend(), StopReason::Hang { pc: 0x1000 });
    }

    #[test]
    fn scripted_step_advances_pc_and_reports_reason() {
        let mut adapter = StubAdapter::new(vec![ScriptedStep {
            pc: 0x1000,
            reason: StopReason::ImportHook { slot: IMPORTS_BASE },
            next_pc: MAGIC_IMPORT,
        }]);
        adapter.write_reg(Register::Pc, 0x1000);
        assert_eq!(adapter.run_until_suspend(), StopReason::ImportHook { slot: IMPORTS_BASE });
        assert_eq!(adapter.read_reg(Register::Pc), MAGIC_IMPORT);
    }

    #[test]
    fn snapshot_restore_round_trips_registers_and_memory() {
        let mut adapter = StubAdapter::new(vec![]);
        adapter.write_reg(Register::X(0), 42);
        adapter.write_mem(0x10, &[1, 2, 3]).unwrap();
        let snap = adapter.snapshot();

        adapter.write_reg(Register::X(0), 99);
        adapter.write_mem(0x10, &[9, 9, 9]).unwrap();
        adapter.restore(snap);

        assert_eq!(adapter.read_reg(Register::X(0)), 42);
        assert_eq!(adapter.read_mem(0x10, 3).unwrap(), vec![1, 2, 3]);
    }
}
