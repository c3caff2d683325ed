//! Aria runtime ABI contract
//!
//! The garbage collector, the wild/wildx allocators, the runtime assembler,
//! and the stdlib string/array/math primitives are an **external
//! collaborator** (spec §1) — this crate does not implement them. What it
//! does provide is the `extern "C"` contract the IR emitter (phase 10,
//! `aria_compiler::codegen`) compiles calls against, so that:
//!
//! - codegen has a single source of truth for symbol names and signatures
//!   instead of hand-written strings scattered through the emitter, and
//! - a real runtime implementation (or a test double, see [`mock`]) can be
//!   linked in and exercised against the same declarations.
//!
//! Continues the teacher's `codegen/runtime.rs` `RUNTIME_DECLARATIONS` table
//! (a `Vec<RuntimeDecl>` of `declare` strings) one level up: there, the
//! table lived inside the compiler crate because Seq ships its own runtime
//! in the same workspace. Aria's runtime is explicitly out of scope, so the
//! contract gets its own crate and the declarations are real `extern "C"`
//! function signatures (grounded in `original_source/include/runtime/*.h`)
//! rather than IR-text strings; `aria_compiler::codegen::runtime` turns each
//! signature in [`ABI_FUNCTIONS`] into a `declare` line.

pub mod abi;
pub mod mock;

pub use abi::{AbiFunction, ABI_FUNCTIONS};
