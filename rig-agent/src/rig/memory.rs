//! In-memory rig backend.
//!
//! Backs the demo daemon and every test that needs a rig to mutate. Keeps
//! the full device table behind one `RwLock` and derives the aggregate
//! status with the same precedence the production aggregator uses:
//! pending until initialization finishes, then later device states win
//! (Disabled < Stopped < Mining < Benchmarking < Error).

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::remote::credentials::LoginCredentials;

use super::{DeviceSnapshot, DeviceState, DeviceType, PowerMode, RigBackend, RigStatus};

#[derive(Debug, Clone)]
struct DeviceEntry {
    snapshot: DeviceSnapshot,
    /// Test knob: refuse power-mode changes for this device.
    reject_power_mode: bool,
}

#[derive(Default)]
struct RigInner {
    initialized: bool,
    devices: Vec<DeviceEntry>,
    power_mode_locked: bool,
    elevated: bool,
    paying_rates: HashMap<u32, f64>,
    stable_algorithms: Option<Vec<u32>>,
    persisted_credentials: Option<LoginCredentials>,
    diagnostics_url: Option<String>,
    restart_count: u32,
}

#[derive(Default)]
pub struct InMemoryRig {
    inner: RwLock<RigInner>,
}

impl InMemoryRig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device in the given state. Telemetry fields start at zero.
    pub fn add_device(&self, id: &str, name: &str, device_type: DeviceType, state: DeviceState) {
        self.inner.write().devices.push(DeviceEntry {
            snapshot: DeviceSnapshot {
                name: name.to_string(),
                id: id.to_string(),
                device_type,
                state,
                load: 0.0,
                speeds: Vec::new(),
                temperature: 0.0,
                fan_rpm: 0,
                power_usage: 0.0,
                power_mode: PowerMode::Medium,
                fan_percent: 0,
                can_set_power_mode: true,
            },
            reject_power_mode: false,
        });
    }

    /// Mark device/algorithm discovery as finished; until then the rig
    /// reports `Pending` and rejects all RPCs.
    pub fn set_initialized(&self, initialized: bool) {
        self.inner.write().initialized = initialized;
    }

    pub fn set_power_mode_locked(&self, locked: bool) {
        self.inner.write().power_mode_locked = locked;
    }

    pub fn set_elevated(&self, elevated: bool) {
        self.inner.write().elevated = elevated;
    }

    pub fn set_diagnostics_url(&self, url: Option<String>) {
        self.inner.write().diagnostics_url = url;
    }

    pub fn set_reject_power_mode(&self, id: &str, reject: bool) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.devices.iter_mut().find(|e| e.snapshot.id == id) {
            entry.reject_power_mode = reject;
        }
    }

    pub fn set_device_telemetry(&self, id: &str, load: f64, temperature: f64, power_usage: f64) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.devices.iter_mut().find(|e| e.snapshot.id == id) {
            entry.snapshot.load = load;
            entry.snapshot.temperature = temperature;
            entry.snapshot.power_usage = power_usage;
        }
    }

    pub fn set_device_speeds(&self, id: &str, speeds: Vec<(u32, f64)>) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.devices.iter_mut().find(|e| e.snapshot.id == id) {
            entry.snapshot.speeds = speeds;
        }
    }

    pub fn set_device_can_set_power_mode(&self, id: &str, can: bool) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.devices.iter_mut().find(|e| e.snapshot.id == id) {
            entry.snapshot.can_set_power_mode = can;
        }
    }

    pub fn device_state(&self, id: &str) -> Option<DeviceState> {
        self.inner
            .read()
            .devices
            .iter()
            .find(|e| e.snapshot.id == id)
            .map(|e| e.snapshot.state)
    }

    pub fn persisted_credentials(&self) -> Option<LoginCredentials> {
        self.inner.read().persisted_credentials.clone()
    }

    pub fn paying_rates(&self) -> HashMap<u32, f64> {
        self.inner.read().paying_rates.clone()
    }

    pub fn stable_algorithms(&self) -> Option<Vec<u32>> {
        self.inner.read().stable_algorithms.clone()
    }

    pub fn restart_count(&self) -> u32 {
        self.inner.read().restart_count
    }
}

#[async_trait]
impl RigBackend for InMemoryRig {
    fn rig_status(&self) -> RigStatus {
        let inner = self.inner.read();
        if !inner.initialized {
            return RigStatus::Pending;
        }
        let states: Vec<DeviceState> = inner.devices.iter().map(|e| e.snapshot.state).collect();
        // Later checks win; a single erroring device marks the rig as Error.
        let mut status = RigStatus::Disabled;
        if states.contains(&DeviceState::Stopped) {
            status = RigStatus::Stopped;
        }
        if states.contains(&DeviceState::Mining) {
            status = RigStatus::Mining;
        }
        if states.contains(&DeviceState::Benchmarking) {
            status = RigStatus::Benchmarking;
        }
        if states.contains(&DeviceState::Error) {
            status = RigStatus::Error;
        }
        status
    }

    fn devices(&self) -> Vec<DeviceSnapshot> {
        self.inner
            .read()
            .devices
            .iter()
            .map(|e| e.snapshot.clone())
            .collect()
    }

    async fn set_devices_enabled(&self, target: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write();
        for entry in inner.devices.iter_mut() {
            if target != "*" && entry.snapshot.id != target {
                continue;
            }
            if enabled && entry.snapshot.state == DeviceState::Disabled {
                entry.snapshot.state = DeviceState::Stopped;
            } else if !enabled && entry.snapshot.state != DeviceState::Disabled {
                entry.snapshot.state = DeviceState::Disabled;
                entry.snapshot.speeds.clear();
            }
        }
        Ok(())
    }

    async fn start_device(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .devices
            .iter_mut()
            .find(|e| e.snapshot.id == id)
            .ok_or_else(|| anyhow!("device {id} not found"))?;
        if entry.snapshot.state == DeviceState::Mining {
            return Err(anyhow!("device {id} is already mining"));
        }
        entry.snapshot.state = DeviceState::Mining;
        Ok(())
    }

    async fn start_all_devices(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let mut started = false;
        for entry in inner.devices.iter_mut() {
            if entry.snapshot.state == DeviceState::Stopped {
                entry.snapshot.state = DeviceState::Mining;
                started = true;
            }
        }
        if started {
            Ok(())
        } else {
            Err(anyhow!("no stopped devices to start"))
        }
    }

    async fn stop_device(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .devices
            .iter_mut()
            .find(|e| e.snapshot.id == id)
            .ok_or_else(|| anyhow!("device {id} not found"))?;
        if entry.snapshot.state != DeviceState::Mining
            && entry.snapshot.state != DeviceState::Benchmarking
        {
            return Err(anyhow!("device {id} is not running"));
        }
        entry.snapshot.state = DeviceState::Stopped;
        entry.snapshot.speeds.clear();
        Ok(())
    }

    async fn stop_all_devices(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let mut stopped = false;
        for entry in inner.devices.iter_mut() {
            if entry.snapshot.state == DeviceState::Mining
                || entry.snapshot.state == DeviceState::Benchmarking
            {
                entry.snapshot.state = DeviceState::Stopped;
                entry.snapshot.speeds.clear();
                stopped = true;
            }
        }
        if stopped {
            Ok(())
        } else {
            Err(anyhow!("no running devices to stop"))
        }
    }

    fn power_mode_settings_disabled(&self) -> bool {
        self.inner.read().power_mode_locked
    }

    fn is_elevated(&self) -> bool {
        self.inner.read().elevated
    }

    fn set_power_mode(&self, id: &str, mode: PowerMode) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.devices.iter_mut().find(|e| e.snapshot.id == id) else {
            return false;
        };
        if entry.reject_power_mode {
            return false;
        }
        entry.snapshot.power_mode = mode;
        true
    }

    async fn persist_credentials(&self, credentials: &LoginCredentials) -> Result<()> {
        self.inner.write().persisted_credentials = Some(credentials.clone());
        Ok(())
    }

    fn update_paying_rates(&self, rates: HashMap<u32, f64>, stable: Option<Vec<u32>>) {
        let mut inner = self.inner.write();
        inner.paying_rates = rates;
        if stable.is_some() {
            inner.stable_algorithms = stable;
        }
    }

    async fn upload_diagnostics(&self) -> Result<Option<String>> {
        Ok(self.inner.read().diagnostics_url.clone())
    }

    async fn restart_rig(&self) -> Result<()> {
        self.inner.write().restart_count += 1;
        Ok(())
    }
}
