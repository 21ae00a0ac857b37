mod pairing_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    courier_sms::{SendOptions, SmsAccountConfig, SmsClient},
    pairing_commands::PairingAction,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "courier", about = "Courier: SMS channel gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/courier/).
    #[arg(long, global = true, env = "COURIER_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "COURIER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured SMS account (default when no subcommand is provided).
    Serve,
    /// Send a one-off message through an SMS account.
    Send {
        /// Account ID under `channels.sms`.
        #[arg(long, default_value = "default")]
        account: String,
        /// Conversation ID to send to.
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        message: String,
        /// Optional media attachment URL.
        #[arg(long)]
        media_url: Option<String>,
    },
    /// Pairing requests and allowlist management.
    Pairing {
        #[command(subcommand)]
        action: PairingAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn send_once(
    config: &courier_config::CourierConfig,
    account: &str,
    to: &str,
    message: &str,
    media_url: Option<String>,
) -> anyhow::Result<()> {
    let raw = config
        .channels
        .sms
        .get(account)
        .cloned()
        .with_context(|| format!("no sms account '{account}' in config"))?;
    let account_config = SmsAccountConfig::from_value(raw)?;
    let client = SmsClient::from_config(reqwest::Client::new(), &account_config);

    let options = SendOptions {
        media_url,
        ..Default::default()
    };
    let result = client.send(to, message, &options).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "courier starting");

    let config = courier_config::discover_and_load(cli.config_dir.as_deref());
    let data_dir = courier_config::data_dir(&config, cli.data_dir.as_deref());

    match cli.command {
        None | Some(Commands::Serve) => {
            courier_gateway::run_until_shutdown(&config, &data_dir).await
        },
        Some(Commands::Send {
            account,
            to,
            message,
            media_url,
        }) => send_once(&config, &account, &to, &message, media_url).await,
        Some(Commands::Pairing { action }) => {
            pairing_commands::handle_pairing(action, &data_dir).await
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["courier", "--json-logs"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.json_logs);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn pairing_approve_defaults_to_sms() {
        let cli = Cli::try_parse_from(["courier", "pairing", "approve", "ABCD2345"]).unwrap();
        match cli.command {
            Some(Commands::Pairing {
                action: PairingAction::Approve { code, channel },
            }) => {
                assert_eq!(code, "ABCD2345");
                assert_eq!(channel, "sms");
            },
            _ => panic!("expected pairing approve"),
        }
    }

    #[test]
    fn send_requires_recipient() {
        assert!(Cli::try_parse_from(["courier", "send", "-m", "hi"]).is_err());
        let cli = Cli::try_parse_from([
            "courier", "send", "--account", "main", "--to", "chat-1", "-m", "hi",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Send { ref account, .. }) if account == "main"
        ));
    }

    #[tokio::test]
    async fn send_to_unknown_account_fails() {
        let config = courier_config::CourierConfig::default();
        let err = send_once(&config, "missing", "chat", "hi", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
