#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Seedkeeper
//!
//! Keeps a declared set of seed records in a key-value table, in response to
//! Create/Update/Delete lifecycle events, without touching records it does
//! not own.
//!
//! This library holds the command line surface and re-exports the workspace
//! crates for convenience.

pub use seedkeeper_events;
pub use seedkeeper_reconciler;

pub mod cli;
pub mod commands;
pub mod config;
