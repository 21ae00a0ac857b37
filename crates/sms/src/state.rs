use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, RwLock},
};

use {
    courier_channels::debounce::InboundDebouncer, tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
};

use crate::{config::SmsAccountConfig, inbound::InboundMessage, outbound::SmsClient};

/// Shared account state map.
pub type AccountStateMap = Arc<RwLock<HashMap<String, AccountState>>>;

/// Per-account runtime state.
pub struct AccountState {
    pub account_id: String,
    pub config: SmsAccountConfig,
    pub client: Arc<SmsClient>,
    pub debouncer: Arc<InboundDebouncer<InboundMessage>>,
    /// Address the webhook listener actually bound.
    pub local_addr: SocketAddr,
    pub cancel: CancellationToken,
    pub server: Option<JoinHandle<()>>,
}
