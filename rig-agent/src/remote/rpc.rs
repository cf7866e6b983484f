//! RPC dispatcher.
//!
//! Maps the closed set of backend-initiated methods to handlers, enforces
//! preconditions and redundant-operation rules, and always produces
//! exactly one [`ExecutedCall`]. Handler failures are typed
//! [`RpcError`]s; anything unexpected from the backend maps to the
//! internal-error code instead of escaping to the session.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Duration;
use tracing::warn;

use crate::rig::{DeviceSnapshot, DeviceType, PowerMode, RigEvent, RigStatus};

use super::Shared;
use super::credentials::{LoginCredentials, validate_payment_address, validate_worker_name};
use super::error::{ErrorCode, RpcError, RpcResult};
use super::messages::{ExecutedCall, rpc_id_of};

/// Grace period between the `rig restart` reply and the actual reboot.
const RESTART_DELAY: Duration = Duration::from_secs(3);

/// The closed RPC method set. A frame is an RPC if and only if its method
/// parses here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    SetUsername,
    SetWorker,
    SetGroup,
    Enable,
    Disable,
    Start,
    Stop,
    SetPowerMode,
    Reset,
}

impl RpcMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "mining.set.username" => Some(Self::SetUsername),
            "mining.set.worker" => Some(Self::SetWorker),
            "mining.set.group" => Some(Self::SetGroup),
            "mining.enable" => Some(Self::Enable),
            "mining.disable" => Some(Self::Disable),
            "mining.start" => Some(Self::Start),
            "mining.stop" => Some(Self::Stop),
            "mining.set.power_mode" => Some(Self::SetPowerMode),
            "miner.reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Fields changed by a successful credential-setter RPC. Applied to the
/// shared login only after the reply went out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub btc: Option<String>,
    pub worker: Option<String>,
    pub group: Option<String>,
}

impl CredentialUpdate {
    pub fn apply(self, credentials: &mut LoginCredentials) {
        if let Some(btc) = self.btc {
            credentials.btc = Some(btc);
        }
        if let Some(worker) = self.worker {
            credentials.worker = Some(worker);
        }
        if let Some(group) = self.group {
            credentials.group = Some(group);
        }
    }
}

/// Result of dispatching one RPC frame.
#[derive(Debug)]
pub struct RpcOutcome {
    pub reply: ExecutedCall,
    /// Present when the reply must be followed by a credential commit and
    /// reconnect.
    pub credential_update: Option<CredentialUpdate>,
}

/// Outcome of a successful handler.
struct Execution {
    answer: Option<String>,
    credential_update: Option<CredentialUpdate>,
}

impl Execution {
    fn executed() -> Self {
        Self {
            answer: None,
            credential_update: None,
        }
    }

    fn with_answer(answer: Option<String>) -> Self {
        Self {
            answer,
            credential_update: None,
        }
    }

    fn with_credentials(update: CredentialUpdate) -> Self {
        Self {
            answer: None,
            credential_update: Some(update),
        }
    }
}

fn str_param<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

pub(crate) struct RpcDispatcher {
    shared: Arc<Shared>,
}

impl RpcDispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Execute one RPC frame. Never fails: business errors and backend
    /// surprises both come back as the reply's error code.
    pub(crate) async fn dispatch(&self, method: &str, frame: &str) -> RpcOutcome {
        let value: Value = serde_json::from_str(frame).unwrap_or(Value::Null);
        let id = rpc_id_of(&value);
        match self.execute(method, &value).await {
            Ok(execution) => RpcOutcome {
                reply: ExecutedCall::success(id, execution.answer),
                credential_update: execution.credential_update,
            },
            Err(error) => {
                warn!(method = %method, code = error.code.as_i64(), error = %error, "RPC failed");
                RpcOutcome {
                    reply: ExecutedCall::failure(id, &error),
                    credential_update: None,
                }
            }
        }
    }

    async fn execute(&self, method: &str, value: &Value) -> RpcResult<Execution> {
        self.ensure_rig_ready()?;
        let Some(kind) = RpcMethod::parse(method) else {
            return Err(RpcError::unable(format!(
                "RPC operation not supported for method '{method}'"
            )));
        };
        match kind {
            RpcMethod::SetUsername => self.set_username(str_param(value, "username")).await,
            RpcMethod::SetWorker => self.set_worker(str_param(value, "worker")).await,
            RpcMethod::SetGroup => self.set_group(str_param(value, "group")).await,
            RpcMethod::Enable => {
                self.set_devices_enabled(str_param(value, "device"), true)
                    .await?;
                Ok(Execution::executed())
            }
            RpcMethod::Disable => {
                self.set_devices_enabled(str_param(value, "device"), false)
                    .await?;
                Ok(Execution::executed())
            }
            RpcMethod::Start => {
                self.start_mining(str_param(value, "device")).await?;
                Ok(Execution::executed())
            }
            RpcMethod::Stop => {
                self.stop_mining(str_param(value, "device")).await?;
                Ok(Execution::executed())
            }
            RpcMethod::SetPowerMode => self.set_power_mode(value),
            RpcMethod::Reset => self.reset(str_param(value, "level")).await,
        }
    }

    /// No RPC executes while the rig has no device/algorithm data yet.
    fn ensure_rig_ready(&self) -> RpcResult<()> {
        if self.shared.backend.rig_status() == RigStatus::Pending {
            return Err(RpcError::unable(
                "Cannot handle RPC call Rig is in PENDING state.",
            ));
        }
        Ok(())
    }

    async fn persist(
        &self,
        update: &CredentialUpdate,
        current: &LoginCredentials,
    ) -> RpcResult<()> {
        let mut next = current.clone();
        update.clone().apply(&mut next);
        self.shared
            .backend
            .persist_credentials(&next)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to persist credentials");
                RpcError::internal()
            })
    }

    async fn set_username(&self, btc: &str) -> RpcResult<Execution> {
        let current = self.shared.credentials.get();
        if current.btc.as_deref() == Some(btc) && !btc.is_empty() {
            return Err(RpcError::redundant(format!(
                "Nothing to change btc \"{btc}\" already set"
            )));
        }
        if !validate_payment_address(btc) {
            return Err(RpcError::new(
                ErrorCode::InvalidUsername,
                "Bitcoin address invalid",
            ));
        }
        let update = CredentialUpdate {
            btc: Some(btc.to_string()),
            ..Default::default()
        };
        self.persist(&update, &current).await?;
        Ok(Execution::with_credentials(update))
    }

    async fn set_worker(&self, worker: &str) -> RpcResult<Execution> {
        let current = self.shared.credentials.get();
        if current.worker.as_deref() == Some(worker) {
            return Err(RpcError::redundant(format!(
                "Nothing to change worker name \"{worker}\" already set"
            )));
        }
        if !validate_worker_name(worker) {
            return Err(RpcError::new(ErrorCode::InvalidWorker, "Worker name invalid"));
        }
        let update = CredentialUpdate {
            worker: Some(worker.to_string()),
            ..Default::default()
        };
        self.persist(&update, &current).await?;
        Ok(Execution::with_credentials(update))
    }

    async fn set_group(&self, group: &str) -> RpcResult<Execution> {
        let current = self.shared.credentials.get();
        if current.group.as_deref() == Some(group) {
            return Err(RpcError::redundant(format!(
                "Nothing to change group \"{group}\" already set"
            )));
        }
        let update = CredentialUpdate {
            group: Some(group.to_string()),
            ..Default::default()
        };
        self.persist(&update, &current).await?;
        Ok(Execution::with_credentials(update))
    }

    async fn set_devices_enabled(&self, target: &str, enabled: bool) -> RpcResult<()> {
        let all = target == "*";
        let devices = self.shared.backend.devices();
        if all && enabled && devices.iter().all(|d| !d.is_disabled()) {
            return Err(RpcError::redundant("All devices are already enabled."));
        }
        if all && !enabled && devices.iter().all(|d| d.is_disabled()) {
            return Err(RpcError::redundant("All devices are already disabled."));
        }
        if !all {
            let device = devices
                .iter()
                .find(|d| d.id == target)
                .ok_or_else(RpcError::non_existent_device)?;
            if device.is_disabled() == !enabled {
                let state = if enabled { "enabled" } else { "disabled" };
                return Err(RpcError::redundant(format!(
                    "Device with id {target} is already {state}."
                )));
            }
        }
        self.shared
            .backend
            .set_devices_enabled(target, enabled)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to change device enablement");
                RpcError::internal()
            })
    }

    async fn start_mining(&self, target: &str) -> RpcResult<()> {
        let devices = self.shared.backend.devices();
        if target == "*" {
            if devices.iter().all(|d| d.is_disabled()) {
                return Err(RpcError::disabled_device(
                    "All devices are disabled cannot start",
                ));
            }
            return self
                .shared
                .backend
                .start_all_devices()
                .await
                .map_err(|e| RpcError::redundant(e.to_string()));
        }
        let context = format!("Cannot start device with id {target}");
        let device = devices.iter().find(|d| d.id == target).ok_or_else(|| {
            RpcError::new(
                ErrorCode::NonExistentDevice,
                format!("{context}. Device not found."),
            )
        })?;
        if device.is_disabled() {
            return Err(RpcError::disabled_device(format!(
                "{context}. Device is disabled."
            )));
        }
        self.shared
            .backend
            .start_device(target)
            .await
            .map_err(|e| RpcError::redundant(format!("{context}. {e}.")))
    }

    async fn stop_mining(&self, target: &str) -> RpcResult<()> {
        let devices = self.shared.backend.devices();
        if target == "*" {
            if devices.iter().all(|d| d.is_disabled()) {
                return Err(RpcError::disabled_device(
                    "All devices are disabled cannot stop",
                ));
            }
            return self
                .shared
                .backend
                .stop_all_devices()
                .await
                .map_err(|e| RpcError::redundant(e.to_string()));
        }
        let context = format!("Cannot stop device with id {target}");
        let device = devices.iter().find(|d| d.id == target).ok_or_else(|| {
            RpcError::new(
                ErrorCode::NonExistentDevice,
                format!("{context}. Device not found."),
            )
        })?;
        if device.is_disabled() {
            return Err(RpcError::disabled_device(format!(
                "{context}. Device is disabled."
            )));
        }
        self.shared
            .backend
            .stop_device(target)
            .await
            .map_err(|e| RpcError::redundant(format!("{context}. {e}.")))
    }

    fn set_power_mode(&self, value: &Value) -> RpcResult<Execution> {
        if self.shared.backend.power_mode_settings_disabled() {
            return Err(RpcError::unable(
                "Not able to set Power Mode: Device Power Mode Settings Disabled",
            ));
        }
        let raw = value
            .get("power_mode")
            .and_then(Value::as_i64)
            .ok_or_else(|| RpcError::unable("Missing or malformed power_mode"))?;
        let mode = PowerMode::try_from(raw)
            .map_err(|v| RpcError::unable(format!("Unknown power mode {v}")))?;

        let target = str_param(value, "device");
        let devices = self.shared.backend.devices();
        let targets: Vec<&DeviceSnapshot> = if target == "*" {
            devices.iter().collect()
        } else {
            devices.iter().filter(|d| d.id == target).collect()
        };

        let found = !targets.is_empty();
        let mut has_settable = false;
        let mut results: Vec<(bool, DeviceType)> = Vec::new();
        for device in targets {
            if device.is_disabled() || !device.can_set_power_mode {
                continue;
            }
            has_settable = true;
            results.push((
                self.shared.backend.set_power_mode(&device.id, mode),
                device.device_type,
            ));
        }

        if results.iter().any(|(ok, _)| !ok) {
            let nvidia_failed = results
                .iter()
                .any(|(ok, ty)| !ok && *ty == DeviceType::Nvidia);
            if nvidia_failed && !self.shared.backend.is_elevated() {
                return Err(RpcError::unable(
                    "Not able to set power modes for devices: must run the agent elevated",
                ));
            }
            return Err(RpcError::unable(
                "Not able to set power modes for all devices",
            ));
        }
        // Empty target set and no-settable-device report identically; the
        // backend treats both as the same condition.
        if !found || !has_settable {
            return Err(RpcError::unable("No settable devices found"));
        }
        Ok(Execution::executed())
    }

    async fn reset(&self, level: &str) -> RpcResult<Execution> {
        match level {
            "app burn" => {
                let _ = self
                    .shared
                    .events
                    .send(RigEvent::Burn("miner.reset app burn called".to_string()));
                Ok(Execution::with_answer(None))
            }
            "rig restart" => {
                // The reply goes out immediately; the reboot runs on its
                // own schedule.
                let backend = self.shared.backend.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(RESTART_DELAY).await;
                    if let Err(e) = backend.restart_rig().await {
                        warn!(error = %e, "Rig restart failed");
                    }
                });
                Ok(Execution::with_answer(None))
            }
            "system dump" => {
                let url = match self.shared.backend.upload_diagnostics().await {
                    Ok(Some(url)) if !url.is_empty() => Some(url),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "Diagnostics upload failed");
                        None
                    }
                };
                Ok(Execution::with_answer(url))
            }
            other => Err(RpcError::unable(format!(
                "miner.reset operation not supported for level '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::rig::memory::InMemoryRig;
    use crate::rig::{DeviceState, DeviceType, RigBackend};

    use super::*;

    const VALID_BTC: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn harness(
        rig: Arc<InMemoryRig>,
        credentials: LoginCredentials,
    ) -> (RpcDispatcher, mpsc::UnboundedReceiver<RigEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(rig, events, credentials));
        (RpcDispatcher::new(shared), events_rx)
    }

    fn ready_rig(states: &[(&str, DeviceState)]) -> Arc<InMemoryRig> {
        let rig = Arc::new(InMemoryRig::new());
        for (id, state) in states {
            rig.add_device(id, id, DeviceType::Nvidia, *state);
        }
        rig.set_initialized(true);
        rig
    }

    fn frame(value: Value) -> String {
        value.to_string()
    }

    #[tokio::test]
    async fn pending_rig_rejects_every_rpc() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        rig.set_initialized(false);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));

        let outcome = dispatcher
            .dispatch(
                "mining.start",
                &frame(json!({"id": 5, "method": "mining.start", "device": "*"})),
            )
            .await;
        assert_eq!(outcome.reply.id, 5);
        assert_eq!(outcome.reply.code, ErrorCode::UnableToHandle.as_i64());
    }

    #[tokio::test]
    async fn unknown_method_is_unable_to_handle() {
        let (dispatcher, _) = harness(
            ready_rig(&[("gpu0", DeviceState::Stopped)]),
            LoginCredentials::new("rig-1"),
        );
        let outcome = dispatcher
            .dispatch("mining.explode", &frame(json!({"id": 1})))
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::UnableToHandle.as_i64());
    }

    #[tokio::test]
    async fn missing_id_defaults_to_minus_one() {
        let (dispatcher, _) = harness(
            ready_rig(&[("gpu0", DeviceState::Stopped)]),
            LoginCredentials::new("rig-1"),
        );
        let outcome = dispatcher
            .dispatch("mining.stop", &frame(json!({"device": "gpu0"})))
            .await;
        assert_eq!(outcome.reply.id, -1);
    }

    #[tokio::test]
    async fn enable_all_is_redundant_when_nothing_disabled() {
        let rig = ready_rig(&[("gpu0", DeviceState::Mining), ("gpu1", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig.clone(), LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.enable",
                &frame(json!({"id": 2, "device": "*"})),
            )
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::Redundant.as_i64());
        assert_eq!(rig.device_state("gpu0"), Some(DeviceState::Mining));
    }

    #[tokio::test]
    async fn enable_all_enables_only_the_disabled() {
        let rig = ready_rig(&[("gpu0", DeviceState::Mining), ("gpu1", DeviceState::Disabled)]);
        let (dispatcher, _) = harness(rig.clone(), LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.enable", &frame(json!({"id": 2, "device": "*"})))
            .await;
        assert!(outcome.reply.is_success());
        assert_eq!(rig.device_state("gpu0"), Some(DeviceState::Mining));
        assert_eq!(rig.device_state("gpu1"), Some(DeviceState::Stopped));
    }

    #[tokio::test]
    async fn disable_single_already_disabled_is_redundant() {
        let rig = ready_rig(&[("gpu0", DeviceState::Disabled)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.disable", &frame(json!({"id": 3, "device": "gpu0"})))
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::Redundant.as_i64());
    }

    #[tokio::test]
    async fn enable_unknown_device_is_not_found() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.enable", &frame(json!({"id": 3, "device": "nope"})))
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::NonExistentDevice.as_i64());
    }

    #[tokio::test]
    async fn start_disabled_device_is_disabled_error() {
        let rig = ready_rig(&[("gpu0", DeviceState::Disabled)]);
        let (dispatcher, _) = harness(rig.clone(), LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.start", &frame(json!({"id": 4, "device": "gpu0"})))
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::DisabledDevice.as_i64());
        assert_eq!(rig.device_state("gpu0"), Some(DeviceState::Disabled));
    }

    #[tokio::test]
    async fn start_unknown_device_is_not_found() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.start", &frame(json!({"id": 4, "device": "ghost"})))
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::NonExistentDevice.as_i64());
    }

    #[tokio::test]
    async fn start_all_with_everything_disabled_is_disabled_error() {
        let rig = ready_rig(&[("gpu0", DeviceState::Disabled), ("gpu1", DeviceState::Disabled)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.start", &frame(json!({"id": 4, "device": "*"})))
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::DisabledDevice.as_i64());
    }

    #[tokio::test]
    async fn stop_device_that_is_not_running_is_redundant() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.stop", &frame(json!({"id": 4, "device": "gpu0"})))
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::Redundant.as_i64());
    }

    #[tokio::test]
    async fn set_username_invalid_address() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.set.username",
                &frame(json!({"id": 6, "username": "junk"})),
            )
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::InvalidUsername.as_i64());
        assert!(outcome.credential_update.is_none());
    }

    #[tokio::test]
    async fn set_username_already_set_is_redundant() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let mut credentials = LoginCredentials::new("rig-1");
        credentials.btc = Some(VALID_BTC.to_string());
        let (dispatcher, _) = harness(rig, credentials);
        let outcome = dispatcher
            .dispatch(
                "mining.set.username",
                &frame(json!({"id": 6, "username": VALID_BTC})),
            )
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::Redundant.as_i64());
    }

    #[tokio::test]
    async fn set_username_change_persists_and_requests_login() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig.clone(), LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.set.username",
                &frame(json!({"id": 6, "username": VALID_BTC})),
            )
            .await;
        assert!(outcome.reply.is_success());
        let update = outcome.credential_update.expect("login should be needed");
        assert_eq!(update.btc.as_deref(), Some(VALID_BTC));
        let persisted = rig.persisted_credentials().expect("should persist");
        assert_eq!(persisted.btc.as_deref(), Some(VALID_BTC));
    }

    #[tokio::test]
    async fn set_worker_rejects_invalid_names() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.set.worker",
                &frame(json!({"id": 7, "worker": "way-too-long-worker-name"})),
            )
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::InvalidWorker.as_i64());
    }

    #[tokio::test]
    async fn set_group_change_succeeds() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig.clone(), LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.set.group", &frame(json!({"id": 8, "group": "attic"})))
            .await;
        assert!(outcome.reply.is_success());
        assert_eq!(
            outcome.credential_update.unwrap().group.as_deref(),
            Some("attic")
        );
        assert_eq!(
            rig.persisted_credentials().unwrap().group.as_deref(),
            Some("attic")
        );
    }

    #[tokio::test]
    async fn power_mode_rejected_when_config_disables_it() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        rig.set_power_mode_locked(true);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.set.power_mode",
                &frame(json!({"id": 9, "device": "*", "power_mode": 2})),
            )
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::UnableToHandle.as_i64());
    }

    #[tokio::test]
    async fn power_mode_no_settable_devices() {
        let rig = ready_rig(&[("gpu0", DeviceState::Disabled)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.set.power_mode",
                &frame(json!({"id": 9, "device": "*", "power_mode": 0})),
            )
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::UnableToHandle.as_i64());
        assert_eq!(
            outcome.reply.result.as_deref(),
            Some("No settable devices found")
        );
    }

    #[tokio::test]
    async fn power_mode_privilege_failure_has_distinct_message() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        rig.set_reject_power_mode("gpu0", true);
        rig.set_elevated(false);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.set.power_mode",
                &frame(json!({"id": 9, "device": "gpu0", "power_mode": 1})),
            )
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::UnableToHandle.as_i64());
        assert!(outcome.reply.result.unwrap().contains("elevated"));
    }

    #[tokio::test]
    async fn power_mode_applies_to_enabled_devices() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped), ("gpu1", DeviceState::Disabled)]);
        let (dispatcher, _) = harness(rig.clone(), LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.set.power_mode",
                &frame(json!({"id": 9, "device": "*", "power_mode": 0})),
            )
            .await;
        assert!(outcome.reply.is_success());
        assert_eq!(rig.devices()[0].power_mode, PowerMode::Low);
        // Disabled device untouched.
        assert_eq!(rig.devices()[1].power_mode, PowerMode::Medium);
    }

    #[tokio::test]
    async fn reset_unknown_level_is_unable_to_handle() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("miner.reset", &frame(json!({"id": 10, "level": "warp"})))
            .await;
        assert_eq!(outcome.reply.code, ErrorCode::UnableToHandle.as_i64());
    }

    #[tokio::test]
    async fn reset_app_burn_emits_event_and_empty_result() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, mut events_rx) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("miner.reset", &frame(json!({"id": 10, "level": "app burn"})))
            .await;
        assert!(outcome.reply.is_success());
        assert!(outcome.reply.result.is_none());
        assert!(matches!(events_rx.try_recv(), Ok(RigEvent::Burn(_))));
    }

    #[tokio::test]
    async fn reset_system_dump_returns_upload_url() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        rig.set_diagnostics_url(Some("https://dump.example/abc".to_string()));
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("miner.reset", &frame(json!({"id": 10, "level": "system dump"})))
            .await;
        assert_eq!(
            outcome.reply.result.as_deref(),
            Some("https://dump.example/abc")
        );
    }

    #[tokio::test]
    async fn reset_system_dump_failure_returns_empty() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        rig.set_diagnostics_url(None);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("miner.reset", &frame(json!({"id": 10, "level": "system dump"})))
            .await;
        assert!(outcome.reply.is_success());
        assert!(outcome.reply.result.is_none());
    }

    #[tokio::test]
    async fn failure_texts_match_the_wire_contract() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        rig.set_initialized(false);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.start", &frame(json!({"id": 1, "device": "*"})))
            .await;
        assert_eq!(
            outcome.reply.result.as_deref(),
            Some("Cannot handle RPC call Rig is in PENDING state.")
        );

        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let mut credentials = LoginCredentials::new("rig-1");
        credentials.btc = Some(VALID_BTC.to_string());
        credentials.worker = Some("worker7".to_string());
        let (dispatcher, _) = harness(rig, credentials);
        let outcome = dispatcher
            .dispatch(
                "mining.set.username",
                &frame(json!({"id": 2, "username": VALID_BTC})),
            )
            .await;
        assert_eq!(
            outcome.reply.result.unwrap(),
            format!("Nothing to change btc \"{VALID_BTC}\" already set")
        );
        let outcome = dispatcher
            .dispatch(
                "mining.set.worker",
                &frame(json!({"id": 3, "worker": "worker7"})),
            )
            .await;
        assert_eq!(
            outcome.reply.result.as_deref(),
            Some("Nothing to change worker name \"worker7\" already set")
        );

        let rig = ready_rig(&[("gpu0", DeviceState::Disabled)]);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("mining.start", &frame(json!({"id": 4, "device": "*"})))
            .await;
        assert_eq!(
            outcome.reply.result.as_deref(),
            Some("All devices are disabled cannot start")
        );
        let outcome = dispatcher
            .dispatch("mining.stop", &frame(json!({"id": 5, "device": "*"})))
            .await;
        assert_eq!(
            outcome.reply.result.as_deref(),
            Some("All devices are disabled cannot stop")
        );

        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        rig.set_power_mode_locked(true);
        let (dispatcher, _) = harness(rig, LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch(
                "mining.set.power_mode",
                &frame(json!({"id": 6, "device": "*", "power_mode": 1})),
            )
            .await;
        assert_eq!(
            outcome.reply.result.as_deref(),
            Some("Not able to set Power Mode: Device Power Mode Settings Disabled")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rig_restart_replies_before_the_reboot() {
        let rig = ready_rig(&[("gpu0", DeviceState::Stopped)]);
        let (dispatcher, _) = harness(rig.clone(), LoginCredentials::new("rig-1"));
        let outcome = dispatcher
            .dispatch("miner.reset", &frame(json!({"id": 10, "level": "rig restart"})))
            .await;
        assert!(outcome.reply.is_success());
        assert_eq!(rig.restart_count(), 0);

        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(rig.restart_count(), 1);
    }
}
