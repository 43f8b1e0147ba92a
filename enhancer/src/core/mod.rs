//! Deterministic, pure logic shared by the enhancement loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod attempts;
pub mod batch;
pub mod digest;
pub mod env_file;
pub mod types;
