//! Notification dispatcher.
//!
//! Non-RPC methods form a closed set disjoint from the RPC surface. Each
//! handler updates local state or fans an event out to the application;
//! nothing here ever replies on the wire. Malformed payloads are logged
//! and dropped, never fatal to the session.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::rig::RigEvent;

use super::Shared;

/// Fiat-rate table message. The `data` field is itself a JSON document
/// encoded as a string.
#[derive(Debug, Deserialize)]
struct ExchangeRatesMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeRateTable {
    exchanges: Option<Vec<HashMap<String, String>>>,
    exchanges_fiat: Option<HashMap<String, f64>>,
}

/// Paying-rate table. `stable` is a JSON array encoded as a string and is
/// optional in both senses: absent, or present but unparseable.
#[derive(Debug, Deserialize)]
struct RateTableMessage {
    #[serde(default)]
    data: Vec<(u32, f64)>,
    stable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceMessage {
    value: String,
}

#[derive(Debug, Deserialize)]
struct VersionMessage {
    v3: String,
}

#[derive(Debug, Deserialize)]
struct BurnMessage {
    message: String,
}

pub(crate) struct NotificationDispatcher {
    shared: Arc<Shared>,
}

impl NotificationDispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Route one non-RPC frame. Unknown methods are a protocol error:
    /// logged and dropped, no reply.
    pub(crate) fn handle(&self, method: &str, frame: &str) {
        let result = match method {
            "sma" => self.rate_table(frame),
            // Reserved by the protocol; no local state to update yet.
            "markets" => Ok(()),
            "balance" => self.balance(frame),
            "versions" => self.version(frame),
            "burn" => self.burn(frame),
            "exchange_rates" => self.exchange_rates(frame),
            other => {
                warn!(method = %other, "Unknown notification method, dropping frame");
                return;
            }
        };
        if let Err(e) = result {
            warn!(method = %method, error = %e, "Malformed notification, dropping frame");
        }
    }

    fn rate_table(&self, frame: &str) -> Result<()> {
        let message: RateTableMessage =
            serde_json::from_str(frame).context("paying-rate table")?;
        let stables = message
            .stable
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<u32>>(raw).ok());
        let rates: HashMap<u32, f64> = message.data.into_iter().collect();
        debug!(
            algorithms = rates.len(),
            stables = stables.as_ref().map_or(0, Vec::len),
            "Updating paying rates"
        );
        self.shared.backend.update_paying_rates(rates, stables);
        Ok(())
    }

    fn balance(&self, frame: &str) -> Result<()> {
        let message: BalanceMessage = serde_json::from_str(frame).context("balance")?;
        // The balance arrives as a decimal string; a bad number is ignored.
        if let Ok(btc) = message.value.parse::<f64>() {
            let _ = self.shared.events.send(RigEvent::BalanceUpdated(btc));
        }
        Ok(())
    }

    fn version(&self, frame: &str) -> Result<()> {
        let message: VersionMessage = serde_json::from_str(frame).context("version")?;
        let _ = self
            .shared
            .events
            .send(RigEvent::VersionAvailable(message.v3));
        Ok(())
    }

    fn burn(&self, frame: &str) -> Result<()> {
        let message: BurnMessage = serde_json::from_str(frame).context("burn")?;
        let _ = self.shared.events.send(RigEvent::Burn(message.message));
        Ok(())
    }

    fn exchange_rates(&self, frame: &str) -> Result<()> {
        let message: ExchangeRatesMessage =
            serde_json::from_str(frame).context("exchange rates")?;
        let table: ExchangeRateTable =
            serde_json::from_str(&message.data).context("exchange rate table")?;
        let (Some(exchanges), Some(fiat)) = (table.exchanges, table.exchanges_fiat) else {
            return Ok(());
        };
        // Scan for the BTC row; -1.0 marks "no usable rate" downstream.
        let usd_btc_rate = exchanges
            .iter()
            .filter(|row| row.get("coin").is_some_and(|coin| coin == "BTC"))
            .find_map(|row| row.get("USD")?.parse::<f64>().ok())
            .unwrap_or(-1.0);
        let _ = self
            .shared
            .events
            .send(RigEvent::ExchangeRatesUpdated { usd_btc_rate, fiat });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::remote::credentials::LoginCredentials;
    use crate::rig::memory::InMemoryRig;

    use super::*;

    fn harness() -> (
        NotificationDispatcher,
        Arc<InMemoryRig>,
        mpsc::UnboundedReceiver<RigEvent>,
    ) {
        let rig = Arc::new(InMemoryRig::new());
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(
            rig.clone(),
            events,
            LoginCredentials::new("rig-1"),
        ));
        (NotificationDispatcher::new(shared), rig, events_rx)
    }

    #[tokio::test]
    async fn rate_table_updates_rates_and_stables() {
        let (dispatcher, rig, _) = harness();
        let frame = json!({
            "method": "sma",
            "data": [[20, 0.000123], [33, 0.5]],
            "stable": "[20]",
        })
        .to_string();
        dispatcher.handle("sma", &frame);

        let rates = rig.paying_rates();
        assert_eq!(rates.get(&20), Some(&0.000123));
        assert_eq!(rates.get(&33), Some(&0.5));
        assert_eq!(rig.stable_algorithms(), Some(vec![20]));
    }

    #[tokio::test]
    async fn unparseable_stable_subset_is_swallowed() {
        let (dispatcher, rig, _) = harness();
        let frame = json!({
            "method": "sma",
            "data": [[20, 0.1]],
            "stable": "not json",
        })
        .to_string();
        dispatcher.handle("sma", &frame);

        assert_eq!(rig.paying_rates().get(&20), Some(&0.1));
        assert_eq!(rig.stable_algorithms(), None);
    }

    #[tokio::test]
    async fn balance_parses_decimal_string() {
        let (dispatcher, _, mut events_rx) = harness();
        dispatcher.handle(
            "balance",
            &json!({"method": "balance", "value": "0.00341"}).to_string(),
        );
        assert_eq!(
            events_rx.try_recv().unwrap(),
            RigEvent::BalanceUpdated(0.00341)
        );
    }

    #[tokio::test]
    async fn unparseable_balance_is_ignored() {
        let (dispatcher, _, mut events_rx) = harness();
        dispatcher.handle(
            "balance",
            &json!({"method": "balance", "value": "three btc"}).to_string(),
        );
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn version_and_burn_fan_out() {
        let (dispatcher, _, mut events_rx) = harness();
        dispatcher.handle(
            "versions",
            &json!({"method": "versions", "v3": "3.2.1"}).to_string(),
        );
        dispatcher.handle(
            "burn",
            &json!({"method": "burn", "message": "blacklisted"}).to_string(),
        );
        assert_eq!(
            events_rx.try_recv().unwrap(),
            RigEvent::VersionAvailable("3.2.1".to_string())
        );
        assert_eq!(
            events_rx.try_recv().unwrap(),
            RigEvent::Burn("blacklisted".to_string())
        );
    }

    #[tokio::test]
    async fn exchange_rates_finds_the_btc_row() {
        let (dispatcher, _, mut events_rx) = harness();
        let table = json!({
            "exchanges": [
                {"coin": "ETH", "USD": "2000.0"},
                {"coin": "BTC", "USD": "64000.5"},
            ],
            "exchanges_fiat": {"EUR": 0.92, "USD": 1.0},
        })
        .to_string();
        dispatcher.handle(
            "exchange_rates",
            &json!({"method": "exchange_rates", "data": table}).to_string(),
        );

        let Ok(RigEvent::ExchangeRatesUpdated { usd_btc_rate, fiat }) = events_rx.try_recv()
        else {
            panic!("expected an exchange-rate event");
        };
        assert_eq!(usd_btc_rate, 64000.5);
        assert_eq!(fiat.get("EUR"), Some(&0.92));
    }

    #[tokio::test]
    async fn exchange_rates_without_btc_row_uses_sentinel() {
        let (dispatcher, _, mut events_rx) = harness();
        let table = json!({
            "exchanges": [{"coin": "ETH", "USD": "2000.0"}],
            "exchanges_fiat": {"USD": 1.0},
        })
        .to_string();
        dispatcher.handle(
            "exchange_rates",
            &json!({"method": "exchange_rates", "data": table}).to_string(),
        );

        let Ok(RigEvent::ExchangeRatesUpdated { usd_btc_rate, .. }) = events_rx.try_recv()
        else {
            panic!("expected an exchange-rate event");
        };
        assert_eq!(usd_btc_rate, -1.0);
    }

    #[tokio::test]
    async fn unknown_method_and_markets_are_quiet() {
        let (dispatcher, _, mut events_rx) = harness();
        dispatcher.handle("markets", &json!({"method": "markets"}).to_string());
        dispatcher.handle("mystery", &json!({"method": "mystery"}).to_string());
        assert!(events_rx.try_recv().is_err());
    }
}
