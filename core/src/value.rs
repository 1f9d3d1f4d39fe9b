//! The abstract virtual value model ("L2CValue") and its auxiliary heap.
//!
//! The physical layout tracked here (`{type, tag, payload}`) mirrors the on-emulator
//! representation so that reading/writing a value at a mapped address is a direct
//! field copy rather than a translation step; see [`crate::heap::AuxHeap`].

use serde::{Deserialize, Serialize};

use crate::cpu::EmulatorAdapter;
use crate::error::EmulatorError;

/// Tag written onto an `Integer` value constructed from a literal matching the
/// `0x....BABE0000` pattern in its low 32 bits. `as_integer` on such a value
/// returns only the low 16 bits kept as payload at construction time.
pub const BABE_TAG: u32 = 0xBABE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum L2CValueType {
    Void = 0,
    Bool = 1,
    Integer = 2,
    Number = 3,
    Pointer = 4,
    Table = 5,
    InnerFunction = 6,
    Hash = 7,
    String = 8,
}

/// A 40-bit hash, as produced by `hash40` (§10, [`crate::hash40::Hasher40`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash40(u64);

impl Hash40 {
    pub const MASK: u64 = 0xFF_FFFF_FFFF;

    pub fn new(raw: u64) -> Self {
        Self(raw & Self::MASK)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A runtime virtual value, as constructed/read/written by the import interpreters
/// of §4.4. Deliberately not a Rust enum over typed payloads: the source treats this
/// as a flat `{type, tag, payload}` triple and several accessors (`as_hash`, §9) rely
/// on reading the payload irrespective of which variant constructed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2CValue {
    ty: L2CValueType,
    tag: u32,
    payload: u64,
}

impl L2CValue {
    pub fn void() -> Self {
        Self { ty: L2CValueType::Void, tag: 0, payload: 0 }
    }

    pub fn boolean(b: bool) -> Self {
        Self { ty: L2CValueType::Bool, tag: 0, payload: b as u64 }
    }

    /// Constructs an integer, applying the `0xBABE` literal-tag rule (§3, §9):
    /// tested against the low 32 bits of `v` only.
    pub fn integer(v: i64) -> Self {
        let raw = v as u64;
        if ((raw as u32) & 0xFFFF_0000) == (BABE_TAG << 16) {
            Self { ty: L2CValueType::Integer, tag: BABE_TAG, payload: raw & 0xFFFF }
        } else {
            Self { ty: L2CValueType::Integer, tag: 0, payload: raw }
        }
    }

    pub fn number(f: f32) -> Self {
        Self { ty: L2CValueType::Number, tag: 0, payload: f.to_bits() as u64 }
    }

    pub fn pointer(addr: u64) -> Self {
        Self { ty: L2CValueType::Pointer, tag: 0, payload: addr }
    }

    pub fn table(addr: u64) -> Self {
        Self { ty: L2CValueType::Table, tag: 0, payload: addr }
    }

    pub fn inner_function(addr: u64) -> Self {
        Self { ty: L2CValueType::InnerFunction, tag: 0, payload: addr }
    }

    pub fn hash(h: Hash40) -> Self {
        Self { ty: L2CValueType::Hash, tag: 0, payload: h.raw() }
    }

    pub fn string(addr: u64) -> Self {
        Self { ty: L2CValueType::String, tag: 0, payload: addr }
    }

    pub fn ty(&self) -> L2CValueType {
        self.ty
    }

    pub fn is_babe_tagged(&self) -> bool {
        self.tag == BABE_TAG
    }

    /// The raw 64-bit payload, as written back into a register by an interpreter.
    pub fn raw(&self) -> u64 {
        self.payload
    }

    pub fn as_bool(&self) -> bool {
        self.payload != 0
    }

    pub fn as_integer(&self) -> i64 {
        self.payload as i64
    }

    pub fn as_number(&self) -> f32 {
        f32::from_bits(self.payload as u32)
    }

    pub fn as_pointer(&self) -> u64 {
        self.payload
    }

    pub fn as_table(&self) -> u64 {
        self.payload
    }

    pub fn as_inner_function(&self) -> u64 {
        self.payload
    }

    /// Returns the low 40 bits of the payload. Preserved quirk (§9): this is the
    /// same accessor for both `Hash` and `Integer` values, which silently conflates
    /// the two at call sites that forward through it.
    pub fn as_hash(&self) -> Hash40 {
        Hash40::new(self.payload)
    }

    pub fn as_string(&self) -> u64 {
        self.payload
    }

    /// On-emulator layout (§3): `{type: u32, tag: u32, payload: u64}`, 16 bytes.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&(self.ty as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.tag.to_le_bytes());
        buf[8..16].copy_from_slice(&self.payload.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let ty_raw = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let tag = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let payload = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let ty = match ty_raw {
            1 => L2CValueType::Bool,
            2 => L2CValueType::Integer,
            3 => L2CValueType::Number,
            4 => L2CValueType::Pointer,
            5 => L2CValueType::Table,
            6 => L2CValueType::InnerFunction,
            7 => L2CValueType::Hash,
            8 => L2CValueType::String,
            _ => L2CValueType::Void,
        };
        Self { ty, tag, payload }
    }

    /// Reads an `L2CValue` through the mapped pointer at `addr` (§4.3).
    pub fn read_at<A: EmulatorAdapter>(adapter: &A, addr: u64) -> Result<Self, EmulatorError> {
        let bytes = adapter.read_mem(addr, 16)?;
        let array: [u8; 16] = bytes.try_into().map_err(|_| EmulatorError::Unmapped { instance: 0, addr })?;
        Ok(Self::from_bytes(&array))
    }

    /// Writes an `L2CValue` through the mapped pointer at `addr` (§4.3).
    pub fn write_at<A: EmulatorAdapter>(self, adapter: &mut A, addr: u64) -> Result<(), EmulatorError> {
        adapter.write_mem(addr, &self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn babe_tag_round_trips_low16() {
        let v = L2CValue::integer(0xBABE_0001_u32 as i64);
        assert!(v.is_babe_tagged());
        assert_eq!(v.as_integer(), 1);
    }

    #[test]
    fn babe_tag_only_matches_low_32_bits() {
        // Setting high bits must not spuriously match or un-match the pattern.
        let v = L2CValue::integer(0x1_BABE_0042_u64 as i64);
        assert!(v.is_babe_tagged());
        assert_eq!(v.as_integer(), 0x42);
    }

    #[test]
    fn non_babe_integer_round_trips_fully() {
        let v = L2CValue::integer(-5);
        assert!(!v.is_babe_tagged());
        assert_eq!(v.as_integer(), -5);
    }

    #[test]
    fn as_hash_conflates_integer_and_hash_variants() {
        let via_hash = L2CValue::hash(Hash40::new(0xDEAD_BEEF_12));
        let via_integer = L2CValue::integer(0xDEAD_BEEF_12_u64 as i64);
        assert_eq!(via_hash.as_hash(), via_integer.as_hash());
    }

    #[test]
    fn byte_layout_round_trips() {
        let v = L2CValue::number(3.5);
        let bytes = v.to_bytes();
        assert_eq!(L2CValue::from_bytes(&bytes), v);
    }

    #[test]
    fn hash40_truncates_to_40_bits() {
        let h = Hash40::new(0xFF_FF_FFFF_FFFF);
        assert_eq!(h.raw(), 0xFF_FFFF_FFFF);
    }
}
