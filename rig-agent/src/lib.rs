//! Remote management channel for mining rigs.
//!
//! This crate maintains the persistent, authenticated connection between a
//! mining rig and its coordination backend. A watchdog keeps one session
//! alive at a time, each session pumps two message queues over a TLS
//! websocket, periodically reports rig/device status, and executes remote
//! procedure calls (start/stop mining, enable/disable devices, credential
//! changes, power modes, diagnostics) against the local rig.
//!
//! The rig itself — device discovery, the miner processes, persisted
//! settings — sits behind the [`rig::RigBackend`] trait. UI-facing state
//! changes (connection status, burn messages, balance updates) fan out
//! through the [`rig::RigEvent`] channel.

pub mod remote;
pub mod rig;
pub mod types;

pub use remote::credentials::LoginCredentials;
pub use remote::RemoteChannel;
pub use rig::{RigBackend, RigEvent};
