//! The register-allocation pass of a JIT assembler.
//!
//! This crate takes a single function's linearised IR -- an ordered list of nodes referencing
//! virtual registers -- and brings it to the point where a target-specific translator can assign
//! physical registers and emit machine code. At a high level the pass has three jobs:
//!
//! 1. Lay out the function's frame: every virtual register that needs memory gets a cell, packed
//!    by power-of-two alignment classes ([ra::frame]).
//! 2. Remove nodes the control flow can never reach, while keeping labels and directives that
//!    other live code may still depend on.
//! 3. Run a backward liveness analysis over the node list, producing a per-node bitmap of the
//!    virtual registers live before that node executes.
//!
//! The target-specific halves (`fetch`, which attaches per-node work data, and `translate`, which
//! consumes the liveness sets) plug in via the [ra::RaTarget] trait. The pass itself is strictly
//! single-threaded: one [ra::RaContext] compiles one function at a time.

pub mod ir;
mod log;
pub mod ra;

use std::{error::Error, fmt};

/// A failure to compile a function.
#[derive(Debug)]
pub enum CompilationError {
    /// Compilation failed for reasons that might be of interest to whoever is driving the
    /// assembler, but which don't suggest a bug in it.
    General(String),
    /// Something went wrong in a way that probably indicates a bug in the caller or in this
    /// crate.
    InternalError(String),
    /// An external resource was exhausted (most commonly: memory).
    ResourceExhausted(Box<dyn Error>),
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilationError::General(s) => write!(f, "General error: {s}"),
            CompilationError::InternalError(s) => write!(f, "Internal error: {s}"),
            CompilationError::ResourceExhausted(e) => write!(f, "Resource exhausted: {e}"),
        }
    }
}
