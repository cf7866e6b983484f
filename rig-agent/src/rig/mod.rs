//! Rig-side domain types and the seam to the local rig.
//!
//! The remote channel never touches devices or miner processes directly.
//! It reads aggregated state and issues mutations through [`RigBackend`],
//! and fans UI-facing updates out through [`RigEvent`]. The production
//! backend wraps the miner-plugin wrapper and the settings store; tests
//! and the demo daemon use [`memory::InMemoryRig`].

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use strum::Display;

use crate::remote::credentials::LoginCredentials;

pub mod memory;

/// Operational state of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Pending,
    Stopped,
    Mining,
    Benchmarking,
    Error,
    Disabled,
}

/// Hardware class of a device. Determines the status-code block it
/// reports in and whether elevation matters for power-mode changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Cpu,
    Nvidia,
    Amd,
}

/// Coarse power profile, as carried on the wire by `mining.set.power_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl TryFrom<i64> for PowerMode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, i64> {
        match value {
            0 => Ok(PowerMode::Low),
            1 => Ok(PowerMode::Medium),
            2 => Ok(PowerMode::High),
            other => Err(other),
        }
    }
}

/// Aggregate rig status, reported as the first element of every status
/// notification. Serialized uppercase (`"MINING"`, `"PENDING"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum RigStatus {
    Pending,
    Offline,
    Disabled,
    Stopped,
    Mining,
    Benchmarking,
    Error,
}

/// Point-in-time view of one device, as consumed by the status snapshot
/// builder and the RPC dispatcher. Produced fresh on every read; the only
/// persistent identity is `id`.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub name: String,
    pub id: String,
    pub device_type: DeviceType,
    pub state: DeviceState,
    /// Utilization percentage, 0-100.
    pub load: f64,
    /// `(algorithm id, speed)` pairs from the miner's local API.
    pub speeds: Vec<(u32, f64)>,
    pub temperature: f64,
    pub fan_rpm: i64,
    pub power_usage: f64,
    pub power_mode: PowerMode,
    pub fan_percent: i64,
    pub can_set_power_mode: bool,
}

impl DeviceSnapshot {
    pub fn is_disabled(&self) -> bool {
        self.state == DeviceState::Disabled
    }
}

/// Wire status code for one device: a per-type block plus the state code.
pub fn report_status(device_type: DeviceType, state: DeviceState) -> i64 {
    let block = match device_type {
        DeviceType::Cpu => 0,
        DeviceType::Nvidia => 10,
        DeviceType::Amd => 20,
    };
    let code = match state {
        DeviceState::Stopped => 1,
        DeviceState::Mining => 2,
        DeviceState::Benchmarking => 3,
        DeviceState::Error => 4,
        DeviceState::Pending => 5,
        DeviceState::Disabled => 6,
    };
    block + code
}

/// UI-facing updates pushed by the remote channel.
///
/// Consumers (the graphical shell, logging) receive these over an
/// unbounded channel; the remote core never blocks on them.
#[derive(Debug, Clone, PartialEq)]
pub enum RigEvent {
    /// Connected/disconnected edge of the backend session.
    ConnectionChanged(bool),
    /// Backend-ordered burn overlay with its message.
    Burn(String),
    /// A newer client version was announced.
    VersionAvailable(String),
    /// Account balance in BTC.
    BalanceUpdated(f64),
    /// BTC->USD rate (−1.0 when the backend sent no usable row) plus the
    /// fiat conversion table.
    ExchangeRatesUpdated {
        usd_btc_rate: f64,
        fiat: HashMap<String, f64>,
    },
}

/// The narrow interface the remote channel holds on the local rig.
///
/// Reads are cheap snapshots; mutations are async because they may reach
/// into miner processes. Mutators return `Err` when there was nothing to
/// change — the dispatcher turns that into the redundant-operation reply.
#[async_trait]
pub trait RigBackend: Send + Sync {
    /// Aggregate status across all devices.
    fn rig_status(&self) -> RigStatus;

    /// All devices in stable enumeration order.
    fn devices(&self) -> Vec<DeviceSnapshot>;

    /// Enable or disable devices. `target` is a device id or `"*"`.
    /// Devices already in the requested state are left untouched.
    async fn set_devices_enabled(&self, target: &str, enabled: bool) -> Result<()>;

    /// Start mining on one device. `Err` when it cannot or need not start.
    async fn start_device(&self, id: &str) -> Result<()>;

    /// Start mining on every startable device. `Err` when none started.
    async fn start_all_devices(&self) -> Result<()>;

    /// Stop mining on one device. `Err` when it was not mining.
    async fn stop_device(&self, id: &str) -> Result<()>;

    /// Stop mining on every running device. `Err` when none stopped.
    async fn stop_all_devices(&self) -> Result<()>;

    /// True when configuration forbids power-mode changes entirely.
    fn power_mode_settings_disabled(&self) -> bool;

    /// True when the process runs with OS administrative privilege.
    fn is_elevated(&self) -> bool;

    /// Apply a power mode to one device. Returns false on hardware refusal.
    fn set_power_mode(&self, id: &str, mode: PowerMode) -> bool;

    /// Persist changed credentials to the settings store.
    async fn persist_credentials(&self, credentials: &LoginCredentials) -> Result<()>;

    /// Update the paying-rate table and, when present, the stable subset.
    fn update_paying_rates(&self, rates: HashMap<u32, f64>, stable: Option<Vec<u32>>);

    /// Collect and upload diagnostics. `Ok(None)` when the upload failed.
    async fn upload_diagnostics(&self) -> Result<Option<String>>;

    /// Reboot the host. Called from a detached task; the RPC that
    /// requested it has already been answered.
    async fn restart_rig(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rig_status_strings_are_uppercase() {
        assert_eq!(RigStatus::Mining.to_string(), "MINING");
        assert_eq!(RigStatus::Pending.to_string(), "PENDING");
        assert_eq!(RigStatus::Benchmarking.to_string(), "BENCHMARKING");
    }

    #[test]
    fn power_mode_from_wire_value() {
        assert_eq!(PowerMode::try_from(0), Ok(PowerMode::Low));
        assert_eq!(PowerMode::try_from(2), Ok(PowerMode::High));
        assert_eq!(PowerMode::try_from(3), Err(3));
    }

    #[test]
    fn status_codes_distinct_per_type_and_state() {
        assert_eq!(report_status(DeviceType::Cpu, DeviceState::Stopped), 1);
        assert_eq!(report_status(DeviceType::Nvidia, DeviceState::Mining), 12);
        assert_eq!(report_status(DeviceType::Amd, DeviceState::Disabled), 26);
    }
}
