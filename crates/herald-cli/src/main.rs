//! # herald
//!
//! Opens a notification channel and prints every notification to stdout as
//! one JSON line. Exits non-zero on a failure the channel cannot recover from.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use herald_channel::{Channel, ChannelConfig, WebSocketTransport};
use herald_settings::HeraldSettings;

/// Stream push notifications from a channel.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "Stream push notifications from a channel")]
struct Cli {
    /// Channel URI (`wss://...`). Falls back to the settings file.
    #[arg(long)]
    uri: Option<String>,

    /// Topic to subscribe to. Repeat for several.
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Raise on channel expiry instead of re-subscribing.
    #[arg(long)]
    no_autoextend: bool,

    /// Fail on transport errors instead of reconnecting.
    #[arg(long)]
    no_reconnect: bool,

    /// Settings file (defaults to `~/.herald/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,
}

/// Merge command-line flags over loaded settings.
fn resolve_config(cli: &Cli, settings: &HeraldSettings) -> Result<ChannelConfig> {
    let Some(uri) = cli.uri.clone().or_else(|| settings.channel.uri.clone()) else {
        bail!("no channel URI: pass --uri or set channel.uri / HERALD_URI");
    };
    let topics = if cli.topics.is_empty() {
        settings.channel.topics.clone()
    } else {
        cli.topics.clone()
    };
    if topics.is_empty() {
        bail!("no topics: pass --topic or set channel.topics / HERALD_TOPICS");
    }

    let mut config = ChannelConfig::from_settings(uri, topics, &settings.channel);
    if cli.no_autoextend {
        config.autoextend = false;
    }
    if cli.no_reconnect {
        config.reconnect_on_failure = false;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(herald_settings::settings_path);
    let settings = herald_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    if settings.logging.json {
        herald_core::logging::init_json_subscriber(level);
    } else {
        herald_core::logging::init_subscriber(level);
    }

    let config = resolve_config(&cli, &settings)?;
    let uri = config.uri.clone();
    let mut channel = Channel::open(config, WebSocketTransport::new())
        .await
        .context("Failed to open channel")?;

    let handle = channel.close_handle();
    let _signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
            handle.close();
        }
    });

    let mut stdout = std::io::stdout().lock();
    loop {
        match channel.next().await {
            Ok(Some(notification)) => {
                let line = serde_json::to_string(&notification)?;
                writeln!(stdout, "{line}").context("Failed to write to stdout")?;
                stdout.flush()?;
            }
            Ok(None) => break,
            Err(e) if e.is_expiring() => {
                tracing::info!(reason = %e.reason(), "channel expiring, rolling over");
                channel
                    .rollover(uri.clone())
                    .await
                    .context("Failed to roll over channel")?;
            }
            Err(e) => return Err(e).context("Channel failed"),
        }
    }

    tracing::info!("Channel closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(uri: Option<&str>, topics: &[&str]) -> HeraldSettings {
        let mut settings = HeraldSettings::default();
        settings.channel.uri = uri.map(String::from);
        settings.channel.topics = topics.iter().map(|t| (*t).to_string()).collect();
        settings
    }

    #[test]
    fn parses_repeated_topics() {
        let cli = Cli::parse_from([
            "herald",
            "--uri",
            "wss://example.test/c",
            "--topic",
            "a",
            "--topic",
            "b",
            "--no-reconnect",
        ]);
        assert_eq!(cli.topics, vec!["a", "b"]);
        assert!(cli.no_reconnect);
        assert!(!cli.no_autoextend);
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "herald",
            "--uri",
            "wss://flag.test/c",
            "--topic",
            "t",
            "--no-autoextend",
        ]);
        let settings = settings_with(Some("wss://settings.test/c"), &["s"]);
        let config = resolve_config(&cli, &settings).unwrap();
        assert_eq!(config.uri, "wss://flag.test/c");
        assert_eq!(config.topics, vec!["t"]);
        assert!(!config.autoextend);
        assert!(config.reconnect_on_failure);
    }

    #[test]
    fn falls_back_to_settings() {
        let cli = Cli::parse_from(["herald"]);
        let settings = settings_with(Some("wss://settings.test/c"), &["s1", "s2"]);
        let config = resolve_config(&cli, &settings).unwrap();
        assert_eq!(config.uri, "wss://settings.test/c");
        assert_eq!(config.topics, vec!["s1", "s2"]);
    }

    #[test]
    fn missing_uri_is_error() {
        let cli = Cli::parse_from(["herald", "--topic", "t"]);
        let err = resolve_config(&cli, &HeraldSettings::default()).unwrap_err();
        assert!(err.to_string().contains("no channel URI"));
    }

    #[test]
    fn missing_topics_is_error() {
        let cli = Cli::parse_from(["herald", "--uri", "wss://x.test"]);
        let err = resolve_config(&cli, &HeraldSettings::default()).unwrap_err();
        assert!(err.to_string().contains("no topics"));
    }

    #[test]
    fn settings_file_feeds_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"channel": {"uri": "wss://file.test/c", "topics": ["f"], "heartbeatTimeoutMs": 5000}}"#,
        )
        .unwrap();
        let settings = herald_settings::read_settings_file(&path).unwrap();

        let config = resolve_config(&Cli::parse_from(["herald"]), &settings).unwrap();
        assert_eq!(config.uri, "wss://file.test/c");
        assert_eq!(config.heartbeat_timeout, std::time::Duration::from_secs(5));
    }
}
