//! NSO/NRO loading and relocation (§6). The resolved, mapped binary image is an
//! external collaborator's concern; what lands here is a flat byte buffer for
//! that image, and this module walks its `MOD0`/dynamic section to populate an
//! [`ImportTable`] and patch pointer-sized relocations in place.
//!
//! No `elf` crate is used: an NSO's `MOD0` segment isn't a standard ELF section
//! table, it's reached by two fixed-offset jumps from the image base (`start`
//! and `mod` in the NSO header, then `dynamic` in the MOD0 header), and the
//! dynamic table itself is the only part that resembles ordinary ELF.

use hashbrown::HashMap;

use crate::cpu::NRO_BASE;
use crate::error::LoaderError;
use crate::imports::ImportTable;

const DT_NULL: i64 = 0;
const DT_PLTRELSZ: i64 = 2;
const DT_STRTAB: i64 = 5;
const DT_SYMTAB: i64 = 6;
const DT_RELA: i64 = 7;
const DT_RELASZ: i64 = 8;

const R_AARCH64_ABS64: u32 = 257;
const R_AARCH64_GLOB_DAT: u32 = 1025;
const R_AARCH64_JUMP_SLOT: u32 = 1026;
const R_AARCH64_RELATIVE: u32 = 1027;

const ELF64_SYM_SIZE: usize = 24;
const ELF64_RELA_SIZE: usize = 24;
const ELF64_DYN_SIZE: usize = 16;

/// The two `u32`s at offset 0 of every NSO/NRO image (§6).
#[derive(Debug, Clone, Copy)]
pub struct NsoHeader {
    pub start: u32,
    pub mod_offset: u32,
}

/// The `MOD0` header, reached at `base + header.mod_offset`.
#[derive(Debug, Clone, Copy)]
pub struct Mod0Header {
    pub magic: u32,
    /// Offset of the dynamic table, relative to this header's own address —
    /// *not* to the image base (matches the pointer arithmetic the loader
    /// that produced this format actually does).
    pub dynamic: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicEntry {
    pub tag: i64,
    pub val: u64,
}

fn read_u32(image: &[u8], off: usize) -> Result<u32, LoaderError> {
    image
        .get(off..off + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| LoaderError::MalformedHeader(format!("truncated u32 read at {off:#x}")))
}

fn read_u64(image: &[u8], off: usize) -> Result<u64, LoaderError> {
    image
        .get(off..off + 8)
        .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| LoaderError::MalformedHeader(format!("truncated u64 read at {off:#x}")))
}

fn read_i64(image: &[u8], off: usize) -> Result<i64, LoaderError> {
    read_u64(image, off).map(|v| v as i64)
}

pub fn parse_nso_header(image: &[u8]) -> Result<NsoHeader, LoaderError> {
    Ok(NsoHeader { start: read_u32(image, 0)?, mod_offset: read_u32(image, 4)? })
}

pub fn parse_mod0_header(image: &[u8], header: &NsoHeader) -> Result<Mod0Header, LoaderError> {
    let base = header.mod_offset as usize;
    Ok(Mod0Header { magic: read_u32(image, base)?, dynamic: read_u32(image, base + 4)? })
}

/// Absolute byte offset of the dynamic table: `header.mod_offset` (MOD0's own
/// offset) plus `modheader.dynamic` (relative to MOD0's address).
fn dynamic_table_offset(header: &NsoHeader, mod0: &Mod0Header) -> usize {
    header.mod_offset as usize + mod0.dynamic as usize
}

/// Reads `Elf64_Dyn` entries starting at `offset` until `DT_NULL`.
pub fn parse_dynamic_table(image: &[u8], offset: usize) -> Result<Vec<DynamicEntry>, LoaderError> {
    let mut entries = Vec::new();
    let mut off = offset;
    loop {
        let tag = read_i64(image, off).map_err(|_| LoaderError::TruncatedDynamicEntry(entries.len()))?;
        let val = read_u64(image, off + 8).map_err(|_| LoaderError::TruncatedDynamicEntry(entries.len()))?;
        entries.push(DynamicEntry { tag, val });
        if tag == DT_NULL {
            break;
        }
        off += ELF64_DYN_SIZE;
    }
    Ok(entries)
}

struct DynamicLayout {
    symtab_off: usize,
    strtab_off: usize,
    rela_off: Option<usize>,
    reloc_count: usize,
}

fn resolve_dynamic_layout(entries: &[DynamicEntry]) -> Result<DynamicLayout, LoaderError> {
    let mut symtab_off = None;
    let mut strtab_off = None;
    let mut rela_off = None;
    let mut rela_bytes = 0u64;
    let mut pltrel_bytes = 0u64;

    for e in entries {
        match e.tag {
            t if t == DT_SYMTAB => symtab_off = Some(e.val as usize),
            t if t == DT_STRTAB => strtab_off = Some(e.val as usize),
            t if t == DT_RELA => rela_off = Some(e.val as usize),
            t if t == DT_RELASZ => rela_bytes = e.val,
            t if t == DT_PLTRELSZ => pltrel_bytes = e.val,
            _ => {}
        }
    }

    let symtab_off = symtab_off.ok_or(LoaderError::MissingDynamicSegment)?;
    let strtab_off = strtab_off.ok_or(LoaderError::MissingDynamicSegment)?;
    let reloc_count = ((rela_bytes + pltrel_bytes) as usize) / ELF64_RELA_SIZE;

    Ok(DynamicLayout { symtab_off, strtab_off, rela_off, reloc_count })
}

fn read_cstr(image: &[u8], off: usize) -> Result<String, LoaderError> {
    let bytes = image.get(off..).ok_or_else(|| LoaderError::MalformedHeader(format!("string table offset {off:#x} out of range")))?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

struct SymEntry {
    name: String,
    shndx: u16,
    value: u64,
}

fn read_symbol(image: &[u8], symtab_off: usize, strtab_off: usize, index: usize) -> Result<SymEntry, LoaderError> {
    let off = symtab_off + index * ELF64_SYM_SIZE;
    let st_name = read_u32(image, off)?;
    let st_shndx = image
        .get(off + 6..off + 8)
        .map(|b| u16::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| LoaderError::MalformedHeader(format!("truncated symbol at {off:#x}")))?;
    let st_value = read_u64(image, off + 8)?;
    Ok(SymEntry { name: read_cstr(image, strtab_off + st_name as usize)?, shndx: st_shndx, value: st_value })
}

/// Walks the symbol table, allocating an import slot for every undefined
/// (`st_shndx == 0`) symbol and recording the absolute address of every
/// defined one. Mirrors the assign-then-relocate two-pass structure of §6.
pub fn assign_symbols(image: &[u8], header: &NsoHeader, imports: &mut ImportTable) -> Result<HashMap<String, u64>, LoaderError> {
    let mod0 = parse_mod0_header(image, header)?;
    let dyn_off = dynamic_table_offset(header, &mod0);
    let entries = parse_dynamic_table(image, dyn_off)?;
    let layout = resolve_dynamic_layout(&entries)?;

    let numsyms = (layout.strtab_off.saturating_sub(layout.symtab_off)) / ELF64_SYM_SIZE;
    let mut resolved = HashMap::new();

    for i in 0..numsyms {
        let sym = read_symbol(image, layout.symtab_off, layout.strtab_off, i)?;
        if sym.name.is_empty() {
            continue;
        }
        let name = crate::imports::demangle(&sym.name);
        if sym.shndx == 0 {
            if imports.slot_of(&name).is_none() {
                imports.allocate_slot(name).map_err(|e| LoaderError::MalformedHeader(e.to_string()))?;
            }
        } else {
            resolved.insert(name, NRO_BASE + sym.value);
        }
    }

    Ok(resolved)
}

/// Patches every `R_AARCH64_RELATIVE`/`GLOB_DAT`/`JUMP_SLOT`/`ABS64` entry in
/// place. An unknown relocation type or a `GLOB_DAT`/`JUMP_SLOT`/`ABS64` whose
/// symbol never got an import slot is recoverable: `log::warn!` and skip (§7),
/// rather than aborting the whole load.
pub fn relocate(
    image: &mut [u8],
    header: &NsoHeader,
    imports: &ImportTable,
) -> Result<(), LoaderError> {
    let mod0 = parse_mod0_header(image, header)?;
    let dyn_off = dynamic_table_offset(header, &mod0);
    let entries = parse_dynamic_table(image, dyn_off)?;
    let layout = resolve_dynamic_layout(&entries)?;

    let Some(rela_off) = layout.rela_off else {
        return Ok(());
    };

    for i in 0..layout.reloc_count {
        let off = rela_off + i * ELF64_RELA_SIZE;
        let r_offset = read_u64(image, off)? as usize;
        let r_info = read_u64(image, off + 8)?;
        let r_addend = read_i64(image, off + 16)?;
        let sym_idx = (r_info >> 32) as usize;
        let r_type = (r_info & 0xFFFF_FFFF) as u32;

        match r_type {
            R_AARCH64_RELATIVE => {
                let value = (NRO_BASE as i64 + r_addend) as u64;
                write_u64(image, r_offset, value)?;
            }
            R_AARCH64_GLOB_DAT | R_AARCH64_JUMP_SLOT | R_AARCH64_ABS64 => {
                let sym = read_symbol(image, layout.symtab_off, layout.strtab_off, sym_idx)?;
                let name = crate::imports::demangle(&sym.name);
                match imports.slot_of(&name) {
                    Some(slot) => write_u64(image, r_offset, slot)?,
                    None => log::warn!("relocation references unresolved symbol {name:?} with no import slot; leaving {r_offset:#x} unpatched"),
                }
            }
            other => {
                log::warn!("unknown relocation type {other} at entry {i}; skipping");
            }
        }
    }

    Ok(())
}

fn write_u64(image: &mut [u8], off: usize, value: u64) -> Result<(), LoaderError> {
    let slot = image
        .get_mut(off..off + 8)
        .ok_or_else(|| LoaderError::MalformedHeader(format!("relocation target {off:#x} out of range")))?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Runs symbol assignment then relocation against `image`, returning the
/// entry-point offset from the NSO header (§6, §8 scenario 1's starting point).
pub fn load(image: &mut [u8], imports: &mut ImportTable) -> Result<u32, LoaderError> {
    let header = parse_nso_header(image)?;
    let resolved = assign_symbols(image, &header, imports)?;
    let _ = resolved; // defined-symbol addresses aren't consumed by relocation itself; kept for callers that want them.
    relocate(image, &header, imports)?;
    Ok(header.start)
}
