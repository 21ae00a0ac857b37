use std::{path::Path, sync::Arc};

use {
    anyhow::Context,
    tracing::{info, warn},
};

use {
    courier_channels::{ChannelPlugin, pairing::PairingStore},
    courier_config::CourierConfig,
    courier_sms::{CHANNEL_ID, SmsPlugin},
};

use crate::{
    agent::agent_from_config, channel_events::GatewayChannelEventSink,
    envelope::PlainEnvelopeFormatter, pairing_store::SqlitePairingStore,
    session::DefaultSessionResolver,
};

/// Running channel accounts wired to the agent backend.
pub struct Gateway {
    plugin: SmsPlugin,
}

impl Gateway {
    /// Open the pairing database under `data_dir` and start every configured
    /// SMS account.
    pub async fn start(config: &CourierConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let store = SqlitePairingStore::open(data_dir)
            .await
            .with_context(|| format!("failed to open pairing store in {}", data_dir.display()))?;
        info!(data_dir = %data_dir.display(), "pairing store ready");
        Self::start_with_store(config, Arc::new(store)).await
    }

    pub async fn start_with_store(
        config: &CourierConfig,
        store: Arc<dyn PairingStore>,
    ) -> anyhow::Result<Self> {
        let window = config.messages.inbound.window_for(CHANNEL_ID);
        let plugin = SmsPlugin::new(store).with_debounce_window(window);
        let sink = GatewayChannelEventSink::new(
            Arc::new(DefaultSessionResolver::new()),
            Arc::new(PlainEnvelopeFormatter),
            agent_from_config(&config.agent)?,
            plugin.shared_outbound(),
        );
        let mut plugin = plugin.with_event_sink(Arc::new(sink));

        let mut account_ids: Vec<&String> = config.channels.sms.keys().collect();
        account_ids.sort();
        if account_ids.is_empty() {
            warn!("no sms accounts configured under channels.sms");
        }
        for account_id in account_ids {
            let account = config.channels.sms[account_id].clone();
            if let Err(e) = plugin.start_account(account_id, account).await {
                plugin.shutdown().await;
                return Err(e.context(format!("failed to start sms account '{account_id}'")));
            }
        }

        Ok(Self { plugin })
    }

    pub fn plugin(&self) -> &SmsPlugin {
        &self.plugin
    }

    /// Stop all accounts. Pending debounced messages are dropped.
    pub async fn shutdown(mut self) {
        self.plugin.shutdown().await;
        info!("gateway stopped");
    }
}

/// Start the gateway and block until Ctrl-C.
pub async fn run_until_shutdown(config: &CourierConfig, data_dir: &Path) -> anyhow::Result<()> {
    let gateway = Gateway::start(config, data_dir).await?;
    info!(
        accounts = gateway.plugin().account_ids().len(),
        "courier gateway running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");
    gateway.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, courier_channels::pairing::InMemoryPairingStore};

    fn config(accounts: serde_json::Value) -> CourierConfig {
        serde_json::from_value(serde_json::json!({ "channels": { "sms": accounts } })).unwrap()
    }

    #[tokio::test]
    async fn starts_configured_accounts() {
        let config = config(serde_json::json!({
            "main": { "token": "t", "webhook": { "port": 0 } },
            "backup": { "token": "t", "webhook": { "port": 0, "path": "/b" } }
        }));
        let gateway = Gateway::start_with_store(&config, Arc::new(InMemoryPairingStore::new()))
            .await
            .unwrap();
        let mut ids = gateway.plugin().account_ids();
        ids.sort();
        assert_eq!(ids, vec!["backup".to_string(), "main".to_string()]);
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn bad_account_stops_the_others() {
        let config = config(serde_json::json!({
            "a": { "webhook": { "port": 0 } },
            "b": { "webhook": { "path": "relative" } }
        }));
        let err = Gateway::start_with_store(&config, Arc::new(InMemoryPairingStore::new()))
            .await
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("'b'"));
    }

    #[tokio::test]
    async fn start_opens_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::start(&CourierConfig::default(), dir.path())
            .await
            .unwrap();
        assert!(gateway.plugin().account_ids().is_empty());
        assert!(dir.path().join("courier.db").exists());
        gateway.shutdown().await;
    }
}
