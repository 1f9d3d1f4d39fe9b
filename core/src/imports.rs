//! The Import Table (§4.2): assigns each unresolved symbol a unique sentinel
//! "import slot" address, keeps the name <-> slot maps the relocator and the
//! hook dispatcher both need, and demangles Itanium-mangled symbol names.

use hashbrown::HashMap;

use crate::cpu::{IMPORTS_BASE, SLOT_SIZE};
use crate::error::ImportError;

/// Demangles an Itanium-mangled C++ symbol name, falling back to the mangled
/// form (with a caller-visible `warn`) when demangling fails — matching the
/// recoverable-and-logged policy of §7.
pub fn demangle(mangled: &str) -> String {
    match cpp_demangle::Symbol::new(mangled) {
        Ok(sym) => sym.to_string(),
        Err(_) => {
            log::warn!("failed to demangle symbol {mangled:?}; using mangled name verbatim");
            mangled.to_string()
        }
    }
}

/// Name <-> import-slot bookkeeping (§4.2, invariant 3 of §3).
#[derive(Debug, Default)]
pub struct ImportTable {
    name_to_slot: HashMap<String, u64>,
    slot_to_name: HashMap<u64, String>,
    next_index: usize,
}

impl ImportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next sentinel slot for a (already demangled) symbol name.
    pub fn allocate_slot(&mut self, name: impl Into<String>) -> Result<u64, ImportError> {
        let name = name.into();
        if self.name_to_slot.contains_key(&name) {
            return Err(ImportError::DuplicateSymbol(name));
        }
        let slot = IMPORTS_BASE + (self.next_index as u64) * SLOT_SIZE;
        self.next_index += 1;
        self.name_to_slot.insert(name.clone(), slot);
        self.slot_to_name.insert(slot, name);
        Ok(slot)
    }

    /// Demangles `mangled` and allocates its slot in one step, as the relocator
    /// does while walking the dynamic symbol table (§6).
    pub fn resolve_and_allocate(&mut self, mangled: &str) -> Result<u64, ImportError> {
        let name = demangle(mangled);
        self.allocate_slot(name)
    }

    pub fn slot_of(&self, name: &str) -> Option<u64> {
        self.name_to_slot.get(name).copied()
    }

    pub fn name_of(&self, slot: u64) -> Option<&str> {
        self.slot_to_name.get(&slot).map(String::as_str)
    }

    pub fn name_of_checked(&self, slot: u64) -> Result<&str, ImportError> {
        self.name_of(slot).ok_or(ImportError::UnknownSlot(slot))
    }

    pub fn len(&self) -> usize {
        self.name_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_slot.is_empty()
    }

    pub fn slots(&self) -> impl Iterator<Item = (&str, u64)> {
        self.name_to_slot.iter().map(|(n, &s)| (n.as_str(), s))
    }
}
