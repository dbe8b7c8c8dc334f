//! Tollgate: verify, authorize, sandbox, and report one signed task.
//!
//! A signed compact token carries the task. The runner verifies it against
//! one pinned algorithm, reconciles it with the on-disk manifest, resolves
//! the requested tool against a registry of digest-pinned authorized tools,
//! launches it inside a hardened sandbox, and emits a single audit event.
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod armory;
pub mod config;
pub mod event;
pub mod executor;
pub mod keys;
pub mod logging;
pub mod manifest;
pub mod pipeline;
pub mod sandbox;
pub mod token;
