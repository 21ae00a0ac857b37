//! SMS channel plugin: per-account webhook listener, debouncer and client.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    secrecy::ExposeSecret,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use courier_channels::{
    ChannelEventSink,
    debounce::{DebounceHandler, InboundDebouncer},
    pairing::PairingStore,
    plugin::{ChannelHealthSnapshot, ChannelOutbound, ChannelPlugin, ChannelStatus},
};

use crate::{
    CHANNEL_ID,
    config::SmsAccountConfig,
    inbound::{EventRouter, InboundMessage, SmsInboundHandler},
    outbound::{SmsClient, SmsOutbound},
    server::{self, WebhookState},
    state::{AccountState, AccountStateMap},
};

/// Default coalescing window when none is configured.
const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(1_500);

/// SMS channel plugin. Each account runs its own webhook listener.
pub struct SmsPlugin {
    accounts: AccountStateMap,
    outbound: SmsOutbound,
    pairing_store: Arc<dyn PairingStore>,
    event_sink: Option<Arc<dyn ChannelEventSink>>,
    debounce_window: Duration,
    http: reqwest::Client,
}

impl SmsPlugin {
    pub fn new(pairing_store: Arc<dyn PairingStore>) -> Self {
        let accounts: AccountStateMap = Arc::new(RwLock::new(HashMap::new()));
        let outbound = SmsOutbound {
            accounts: Arc::clone(&accounts),
        };
        Self {
            accounts,
            outbound,
            pairing_store,
            event_sink: None,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn ChannelEventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Coalescing window for accounts started afterwards. Zero disables it.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn shared_outbound(&self) -> Arc<dyn ChannelOutbound> {
        Arc::new(self.outbound.clone())
    }

    pub fn account_ids(&self) -> Vec<String> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.keys().cloned().collect()
    }

    pub fn has_account(&self, account_id: &str) -> bool {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.contains_key(account_id)
    }

    /// Address the account's webhook listener is bound to.
    pub fn local_addr(&self, account_id: &str) -> Option<SocketAddr> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(account_id).map(|s| s.local_addr)
    }

    /// REST client of a running account.
    pub fn client(&self, account_id: &str) -> Option<Arc<SmsClient>> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(account_id).map(|s| Arc::clone(&s.client))
    }

    /// Stop every running account.
    pub async fn shutdown(&mut self) {
        for account_id in self.account_ids() {
            if let Err(e) = self.stop_account(&account_id).await {
                warn!(account_id = %account_id, "failed to stop sms account: {e:#}");
            }
        }
    }
}

#[async_trait]
impl ChannelPlugin for SmsPlugin {
    fn id(&self) -> &str {
        CHANNEL_ID
    }

    fn name(&self) -> &str {
        "SMS"
    }

    async fn start_account(&mut self, account_id: &str, config: serde_json::Value) -> Result<()> {
        let cfg = SmsAccountConfig::from_value(config)?;
        if self.has_account(account_id) {
            anyhow::bail!("sms account already running: {account_id}");
        }
        if cfg.api_base_url.trim().is_empty() || cfg.token.expose_secret().trim().is_empty() {
            warn!(
                account_id,
                "sms api_base_url or token missing, replies will fail"
            );
        }
        if cfg.webhook_secret().is_none() {
            warn!(
                account_id,
                "sms webhook_secret not set, accepting unsigned requests"
            );
        }

        let client = Arc::new(SmsClient::from_config(self.http.clone(), &cfg));
        let handler = Arc::new(SmsInboundHandler {
            account_id: account_id.to_string(),
            config: cfg.clone(),
            client: Arc::clone(&client),
            outbound: self.shared_outbound(),
            store: Arc::clone(&self.pairing_store),
            event_sink: self.event_sink.clone(),
        });
        let debouncer = Arc::new(InboundDebouncer::new(
            self.debounce_window,
            handler as Arc<dyn DebounceHandler<InboundMessage>>,
        ));

        let listener = server::bind(&cfg.webhook.host, cfg.webhook.port)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "failed to bind sms webhook on {}:{}: {e}",
                    cfg.webhook.host,
                    cfg.webhook.port
                )
            })?;
        let local_addr = listener.local_addr()?;

        let state = WebhookState {
            account_id: account_id.to_string(),
            path: cfg.webhook.path.clone(),
            secret: cfg.webhook_secret().map(Arc::from),
            handler: Arc::new(EventRouter {
                account_id: account_id.to_string(),
                debouncer: Arc::clone(&debouncer),
                event_sink: self.event_sink.clone(),
            }),
        };
        let cancel = CancellationToken::new();
        let server_task = tokio::spawn({
            let cancel = cancel.clone();
            let account_id = account_id.to_string();
            async move {
                if let Err(e) = server::serve(listener, state, cancel).await {
                    warn!(account_id = %account_id, "sms webhook server failed: {e}");
                }
            }
        });

        info!(
            account_id,
            %local_addr,
            debounce_ms = self.debounce_window.as_millis() as u64,
            "starting sms account"
        );
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.insert(account_id.to_string(), AccountState {
            account_id: account_id.to_string(),
            config: cfg,
            client,
            debouncer,
            local_addr,
            cancel,
            server: Some(server_task),
        });
        Ok(())
    }

    async fn stop_account(&mut self, account_id: &str) -> Result<()> {
        let removed = {
            let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
            accounts.remove(account_id)
        };
        let Some(state) = removed else {
            warn!(account_id, "sms account not found");
            return Ok(());
        };

        info!(account_id, "stopping sms account");
        state.cancel.cancel();
        state.debouncer.shutdown();
        if let Some(server_task) = state.server
            && let Err(e) = server_task.await
        {
            warn!(account_id, "sms webhook task ended abnormally: {e}");
        }
        Ok(())
    }

    fn outbound(&self) -> Option<&dyn ChannelOutbound> {
        Some(&self.outbound)
    }

    fn status(&self) -> Option<&dyn ChannelStatus> {
        Some(self)
    }
}

#[async_trait]
impl ChannelStatus for SmsPlugin {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        let Some(state) = accounts.get(account_id) else {
            return Ok(ChannelHealthSnapshot {
                connected: false,
                account_id: account_id.to_string(),
                details: Some("account not started".into()),
            });
        };
        let listening = state.server.as_ref().is_some_and(|h| !h.is_finished());
        let details = if listening {
            format!(
                "listening on {}{}, pending batches: {}",
                state.local_addr,
                state.config.webhook.path,
                state.debouncer.pending_keys()
            )
        } else {
            "webhook listener stopped".to_string()
        };
        Ok(ChannelHealthSnapshot {
            connected: listening,
            account_id: state.account_id.clone(),
            details: Some(details),
        })
    }
}
