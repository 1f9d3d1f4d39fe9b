//! Symbolic-execution engine that recovers per-entry-point control-flow graphs
//! of token streams from AArch64 game-script routines invoked through an
//! opaque C++-style runtime (the "L2C" runtime).
//!
//! The engine depends on three narrow collaborator traits rather than their
//! internals: [`cpu::EmulatorAdapter`] (a CPU core), [`hash40::Hasher40`] (a
//! content hash), and the loader types in [`elf`] (ELF/NRO relocation). None of
//! those concerns is implemented here beyond a reference/test-only stand-in.

pub mod block;
pub mod cluster;
pub mod cpu;
pub mod elf;
pub mod error;
pub mod hash40;
pub mod heap;
pub mod imports;
pub mod instance;
pub mod interpreters;
pub mod store;
pub mod token;
pub mod value;
