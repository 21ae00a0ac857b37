//! `courier pairing ...`: inspect and approve pending pairing requests.

use std::path::Path;

use {
    anyhow::Result,
    clap::Subcommand,
    courier_channels::pairing::{PairingRequest, PairingStore},
    courier_common::unix_now,
    courier_gateway::SqlitePairingStore,
};

#[derive(Subcommand)]
pub enum PairingAction {
    /// List pending pairing requests.
    List {
        #[arg(long, default_value = courier_sms::CHANNEL_ID)]
        channel: String,
    },
    /// Approve a pairing code, adding its sender to the allowlist.
    Approve {
        /// Code shown to the sender.
        code: String,
        #[arg(long, default_value = courier_sms::CHANNEL_ID)]
        channel: String,
    },
    /// Add a sender to the allowlist without a pairing code.
    Allow {
        sender: String,
        #[arg(long, default_value = courier_sms::CHANNEL_ID)]
        channel: String,
    },
}

pub async fn handle_pairing(action: PairingAction, data_dir: &Path) -> Result<()> {
    let store = SqlitePairingStore::open(data_dir).await?;
    run(action, &store).await
}

async fn run(action: PairingAction, store: &dyn PairingStore) -> Result<()> {
    match action {
        PairingAction::List { channel } => {
            let requests = store.list_requests(&channel).await?;
            if requests.is_empty() {
                println!("No pending pairing requests for {channel}.");
            }
            let now = unix_now();
            for request in &requests {
                println!("{}", format_request(request, now));
            }
        },
        PairingAction::Approve { code, channel } => match store.approve(&channel, &code).await? {
            Some(request) => println!("Approved {} on {channel}.", request.sender_id),
            None => anyhow::bail!("no pending pairing request with code {code} on {channel}"),
        },
        PairingAction::Allow { sender, channel } => {
            store.add_allow_from(&channel, &sender).await?;
            println!("Allowed {} on {channel}.", sender.trim());
        },
    }
    Ok(())
}

fn format_request(request: &PairingRequest, now: i64) -> String {
    let age_mins = now.saturating_sub(request.created_at).max(0) / 60;
    format!(
        "  {}  {}  ({age_mins}m ago)",
        request.code, request.sender_id
    )
}
