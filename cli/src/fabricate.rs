//! Synthetic `L2CAgent` dispatch-object fabrication and the virtual-method-9
//! redispatch pattern. Ported from the driver's own agent bootstrap rather
//! than the core engine: it only pokes bytes through `EmulatorAdapter` and
//! allocates import slots, neither of which is a core-engine concern.

use anyhow::{Context, Result};
use l2c_recover_core::cpu::{EmulatorAdapter, AUX_HEAP_BASE, AUX_HEAP_SIZE};
use l2c_recover_core::heap::AuxHeap;
use l2c_recover_core::imports::ImportTable;

/// Address range backing fabricated dispatch objects, kept disjoint from the
/// instance-owned auxiliary heap `ClusterManager::run_entry` allocates fresh
/// for every entry-point so the two never collide.
pub const FABRICATE_BASE: u64 = AUX_HEAP_BASE + AUX_HEAP_SIZE;
pub const FABRICATE_SIZE: u64 = 0x10_0000;

const AGENT_HEADER_SIZE: u64 = 0x1000;
const AUX_REGION_SIZE: u64 = 0x1000;
const UNK40_SIZE: u64 = 0x200;
const CLASS_COUNT: u64 = UNK40_SIZE / 8; // 0x40
const VTABLE_SLOTS: u64 = 512;

/// Builds the fabricated agent object: an agent header, an auxiliary
/// `unkptr40` region, and `0x40` classes each with a fresh 512-entry vtable
/// whose every slot routes through a newly allocated import hook. Returns the
/// agent pointer — the value a `status_script`-style entry-point expects in `x0`.
pub fn fabricate_agent<A: EmulatorAdapter>(
    emu: &mut A,
    heap: &mut AuxHeap,
    imports: &mut ImportTable,
    instance: u32,
) -> Result<u64> {
    let agent_ptr = heap.alloc(instance, AGENT_HEADER_SIZE).context("allocating agent header")?;
    let unk40_ptr = heap.alloc(instance, AUX_REGION_SIZE).context("allocating unkptr40 region")?;
    emu.write_mem(agent_ptr, &unk40_ptr.to_le_bytes())?;

    for i in 0..CLASS_COUNT {
        let class_ptr = heap.alloc(instance, AGENT_HEADER_SIZE)?;
        let vtable_ptr = heap.alloc(instance, VTABLE_SLOTS * 8)?;

        emu.write_mem(unk40_ptr + i * 8, &class_ptr.to_le_bytes())?;
        emu.write_mem(class_ptr, &vtable_ptr.to_le_bytes())?;

        for j in 0..VTABLE_SLOTS {
            let slot = imports.allocate_slot(format!("L2CUnk40ptr{i:#x}VtableFunc{j}"))?;
            emu.write_mem(vtable_ptr + j * 8, &slot.to_le_bytes())?;
        }
    }

    log::debug!("fabricated agent at {agent_ptr:#x}: {CLASS_COUNT} classes, {VTABLE_SLOTS} vtable slots each");
    Ok(agent_ptr)
}

/// Reads the function pointer at vtable offset `9 * 8` from the vtable pointed
/// to by `agent_ptr`'s own first field: the driver's way of turning a
/// `status_script` agent's return into a new entry-point.
pub fn redispatch_virtual_method_9<A: EmulatorAdapter>(emu: &A, agent_ptr: u64) -> Result<u64> {
    let vtable_ptr = read_u64(emu, agent_ptr)?;
    read_u64(emu, vtable_ptr + 9 * 8)
}

fn read_u64<A: EmulatorAdapter>(emu: &A, addr: u64) -> Result<u64> {
    let bytes = emu.read_mem(addr, 8).with_context(|| format!("reading u64 at {addr:#x}"))?;
    let array: [u8; 8] = bytes.try_into().map_err(|_| anyhow::anyhow!("short read at {addr:#x}"))?;
    Ok(u64::from_le_bytes(array))
}
