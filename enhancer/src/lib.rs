//! Frontend enhancement loop: capture a screenshot, ask for UI feedback, and
//! hand the feedback to a code agent that edits the target repository.
//!
//! The crate is split in two layers:
//!
//! - **[`core`]**: Pure, deterministic logic (payload shapes, batch
//!   normalization, env-file rendering, retry rule, directory naming).
//! - **[`io`]**: Side effects (HTTP step clients, the code agent process,
//!   versioned config stores, artifacts).
//!
//! [`pipeline`] and [`router`] coordinate the two; `enhancer-services` hosts the
//! router and the apply bridge over HTTP.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod router;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
