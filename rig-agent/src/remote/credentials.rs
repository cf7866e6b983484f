//! Login credentials and their validation rules.
//!
//! One `LoginCredentials` value lives for the whole application and is
//! shared across sessions through a locked cell; every reconnect reads it
//! fresh. Mutation happens only through the credential-setter RPCs and the
//! public setter on [`RemoteChannel`](super::RemoteChannel), both of which
//! also schedule a reconnect so a session never sends a half-updated
//! login.

use std::str::FromStr;

use bitcoin::{Address, Network};

use super::messages::{LoginMessage, PROTOCOL_VERSION};

const MAX_WORKER_NAME_LEN: usize = 15;

/// Identity the rig presents at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub rig_id: String,
    /// Mining payment address. The rig cannot be attributed to an account
    /// without a valid one, so heartbeats are gated on it.
    pub btc: Option<String>,
    pub worker: Option<String>,
    pub group: Option<String>,
}

impl LoginCredentials {
    pub fn new(rig_id: impl Into<String>) -> Self {
        Self {
            rig_id: rig_id.into(),
            btc: None,
            worker: None,
            group: None,
        }
    }

    pub fn login_message(&self) -> LoginMessage {
        LoginMessage {
            version: format!("rig-agent/{}", env!("CARGO_PKG_VERSION")),
            protocol: PROTOCOL_VERSION,
            rig: self.rig_id.clone(),
            btc: self.btc.clone(),
            worker: self.worker.clone(),
            group: self.group.clone(),
        }
    }

    pub fn has_valid_btc(&self) -> bool {
        self.btc.as_deref().is_some_and(validate_payment_address)
    }
}

/// True when `address` parses as a mainnet bitcoin address.
pub fn validate_payment_address(address: &str) -> bool {
    Address::from_str(address).is_ok_and(|a| a.require_network(Network::Bitcoin).is_ok())
}

/// Worker names are ASCII alphanumeric, at most 15 characters.
pub fn validate_worker_name(name: &str) -> bool {
    name.len() <= MAX_WORKER_NAME_LEN && name.chars().all(|c| c.is_ascii_alphanumeric())
}
