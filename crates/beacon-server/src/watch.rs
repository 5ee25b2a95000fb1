//! `watch` subcommand: subscribe to channels and log every event received.

use crate::error::AppResult;
use beacon_core::{ChannelName, Event};
use beacon_ws::{ConnectionConfig, ReconnectManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What to subscribe to.
#[derive(Debug, Clone, Default)]
pub struct WatchPlan {
    pub identity: Option<String>,
    pub chains: Vec<u64>,
    pub prices: Vec<String>,
    pub transactions: Vec<String>,
}

impl WatchPlan {
    pub fn is_empty(&self) -> bool {
        self.identity.is_none()
            && self.chains.is_empty()
            && self.prices.is_empty()
            && self.transactions.is_empty()
    }
}

/// Connect, subscribe, and log events until `shutdown` fires or the client gives up.
pub async fn watch(
    config: ConnectionConfig,
    plan: WatchPlan,
    shutdown: CancellationToken,
) -> AppResult<()> {
    if plan.is_empty() {
        warn!("Nothing to watch; only broadcast announcements will arrive");
    }

    let (manager, handle, mut events) = ReconnectManager::new(config)?;
    if let Some(identity) = plan.identity {
        handle.authenticate(identity);
    }
    for chain_id in plan.chains {
        handle.subscribe_chain(chain_id);
    }
    handle.subscribe_prices(&plan.prices);
    for address in &plan.transactions {
        handle.subscribe_transactions(address);
    }
    info!(
        url = %manager.config().url,
        subscriptions = handle.subscriptions().len(),
        "Watching channels"
    );

    let manager = Arc::new(manager);
    let mut runner = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run().await }
    });

    let result = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                handle.disconnect();
                break (&mut runner).await;
            }
            result = &mut runner => break result,
            Some(event) = events.recv() => log_event(&event),
        }
    };

    match result {
        Ok(outcome) => outcome.map_err(Into::into),
        Err(e) => {
            warn!(error = %e, "Client task failed");
            Ok(())
        }
    }
}

fn log_event(event: &Event) {
    let channel = event.channel.as_ref().map(ChannelName::as_str).unwrap_or("-");
    match event.payload.data() {
        Ok(data) => info!(
            event_type = event.event_type(),
            channel,
            timestamp = event.timestamp_ms,
            %data,
            "Event"
        ),
        Err(e) => warn!(event_type = event.event_type(), error = %e, "Unprintable event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_plan() {
        assert!(WatchPlan::default().is_empty());
        let plan = WatchPlan {
            chains: vec![1],
            ..WatchPlan::default()
        };
        assert!(!plan.is_empty());
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ConnectionConfig {
            reconnect_base_delay_ms: 10_000,
            reconnect_max_delay_ms: 10_000,
            ..ConnectionConfig::new(format!("ws://{addr}"))
        };
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(watch(
            config,
            WatchPlan {
                chains: vec![11155931],
                ..WatchPlan::default()
            },
            shutdown.clone(),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
