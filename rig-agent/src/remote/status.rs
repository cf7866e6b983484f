//! Status snapshot builder.
//!
//! A pure function from rig/device state to the `miner.status` wire
//! payload: `[rig_status_string, [device_row, ...]]`. Device rows keep the
//! backend's column order; display names are included only for the
//! login-time snapshot, and speed pairs only while the device is actually
//! mining. Numeric telemetry is rounded to integers at serialization time.

use serde_json::{Value, json};

use crate::rig::{DeviceSnapshot, DeviceState, RigStatus, report_status};

use super::messages::{STATUS_METHOD, StatusMessage};

/// Serialize the full status notification frame.
pub fn build_status(status: RigStatus, devices: &[DeviceSnapshot], include_names: bool) -> String {
    let rows: Vec<Value> = devices
        .iter()
        .map(|device| device_row(device, include_names))
        .collect();
    let message = StatusMessage {
        method: STATUS_METHOD,
        param: vec![Value::from(status.to_string()), Value::from(rows)],
    };
    // StatusMessage contains only string/array values; serialization
    // cannot fail.
    serde_json::to_string(&message).unwrap_or_default()
}

fn device_row(device: &DeviceSnapshot, include_names: bool) -> Value {
    let name = if include_names {
        device.name.as_str()
    } else {
        ""
    };
    let speeds: Vec<Value> = if device.state == DeviceState::Mining {
        device
            .speeds
            .iter()
            .map(|(algorithm, speed)| json!([algorithm, speed]))
            .collect()
    } else {
        Vec::new()
    };
    json!([
        name,
        device.id,
        report_status(device.device_type, device.state),
        device.load.round() as i64,
        speeds,
        device.temperature.round() as i64,
        device.fan_rpm,
        device.power_usage.round() as i64,
        device.power_mode as i64,
        0, // intensity placeholder
        device.fan_percent,
    ])
}
