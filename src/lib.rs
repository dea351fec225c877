//! Output backend for an assembler toolchain.
//!
//! Takes already-encoded machine-code functions and emits a complete,
//! loadable artifact in one of several formats. It is organized into
//! several modules:
//! - `abi`: Target ABI descriptions.
//! - `function`: The seam to the instruction-encoder collaborator.
//! - `formats`: Per-format in-memory object containers.
//! - `writer`: Format writers and the scoped-acquisition lifecycle.
//! - `registry`: The process-wide active-writer slot.

pub mod abi;
pub mod encoder;
pub mod error;
pub mod formats;
pub mod function;
pub mod registry;
pub mod utils;
pub mod writer;
