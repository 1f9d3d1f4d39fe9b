//! Typed error boundaries, one enum per component, per the error handling policy:
//! recoverable-and-logged kinds are never turned into a propagated error, they are
//! just `log::warn!`'d at the call site and the engine keeps going.

use thiserror::Error;

/// Errors surfaced by an [`crate::cpu::EmulatorAdapter`] implementation.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("instance {instance}: invalid memory read at {addr:#x}")]
    InvalidRead { instance: u32, addr: u64 },

    #[error("instance {instance}: invalid memory write at {addr:#x}")]
    InvalidWrite { instance: u32, addr: u64 },

    #[error("instance {instance}: register {reg:?} is not addressable by this adapter")]
    UnknownRegister { instance: u32, reg: crate::cpu::Register },

    #[error("instance {instance}: address {addr:#x} is not mapped")]
    Unmapped { instance: u32, addr: u64 },
}

/// Errors from the ELF/NRO relocation collaborator (§6 of the design).
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("malformed NSO/NRO header: {0}")]
    MalformedHeader(String),

    #[error("no dynamic segment present")]
    MissingDynamicSegment,

    #[error("truncated dynamic table entry at index {0}")]
    TruncatedDynamicEntry(usize),

    #[error("relocation referenced undefined symbol index {0}")]
    UndefinedSymbol(usize),
}

/// Errors from the Import Table (symbol <-> slot bookkeeping).
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import slot space exhausted after {0} slots")]
    SlotsExhausted(usize),

    #[error("symbol {0:?} was already assigned a slot")]
    DuplicateSymbol(String),

    #[error("address {0:#x} is not a known import slot")]
    UnknownSlot(u64),
}

/// Errors reading/writing the abstract value model at an emulator address.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("instance {instance}: bad L2CValue assignment at {addr:#x}")]
    BadAssignment { instance: u32, addr: u64 },

    #[error("instance {instance}: auxiliary heap exhausted requesting {requested} bytes")]
    HeapExhausted { instance: u32, requested: u64 },

    #[error("instance {instance}: virtual stack underflow popping {requested} values")]
    StackUnderflow { instance: u32, requested: usize },
}

/// Errors that terminate a single [`crate::instance::Instance`] but never its siblings.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance {instance}: hang detected at {pc:#x}")]
    Hang { instance: u32, pc: u64 },

    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Errors that stop an entire [`crate::cluster::ClusterManager`] run.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("instance {instance}: invalid memory write at {addr:#x} is fatal for this entry-point")]
    FatalInvalidWrite { instance: u32, addr: u64 },

    #[error("heap exhaustion in the manager itself")]
    ManagerHeapExhausted,

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Import(#[from] ImportError),
}
