//! Execution core of the Vulcan VM.
//!
//! The [`host::VmHost`] owns seven execution contexts (runtime, metering,
//! output, storage, blockchain, managed types, async) and drives the WASM
//! engine through the [`executor`] abstraction. Contracts reach back into
//! the host through the [`eei`] functions.

pub mod config;
pub mod contexts;
pub mod eei;
pub mod executor;
pub mod host;

pub use config::HostConfig;
pub use host::VmHost;
