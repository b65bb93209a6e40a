use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use dispatch::Dispatcher;
use logging::init_logging;
use model::{NotificationPayload, PushSubscription};
use serde_json::{Map, Value};
use server::serve;
use transport::HttpTransport;

mod config;
mod dispatch;
mod ece;
mod email;
mod encoding;
mod fcm;
mod logging;
mod model;
mod rate_limiter;
mod recipient;
mod report;
mod server;
mod server_state;
mod transport;
mod vapid;
mod webpush;

#[derive(Parser)]
#[command(version, about = "Web Push and FCM notification relay")]
struct Opts {
    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Run the HTTP relay.
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print a new VAPID key pair.
    GenerateVapidKeys,
    /// Send one notification and print the delivery report.
    Send {
        /// Recipient token (`webpush:...` or an FCM registration token).
        #[arg(long = "token")]
        tokens: Vec<String>,

        /// JSON file holding a browser push subscription.
        #[arg(long = "subscription")]
        subscriptions: Vec<PathBuf>,

        #[arg(long)]
        title: String,

        #[arg(long)]
        body: String,

        /// Extra data entry, as `key=value`.
        #[arg(long = "data", value_parser = parse_key_value)]
        data: Vec<(String, String)>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    Ok((key.to_string(), value.to_string()))
}

fn subscription_token(path: &Path) -> Result<String> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read {}.", path.display()))?;
    let subscription: PushSubscription = serde_json::from_str(&json)
        .with_context(|| format!("{} is not a push subscription.", path.display()))?;

    Ok(recipient::webpush_token(&subscription)?)
}

async fn send(
    mut tokens: Vec<String>,
    subscriptions: Vec<PathBuf>,
    notification: NotificationPayload,
) -> Result<()> {
    for path in &subscriptions {
        tokens.push(subscription_token(path)?);
    }
    if tokens.is_empty() {
        bail!("Pass at least one --token or --subscription.");
    }

    let config = Config::from_env()?;
    let transport = Arc::new(HttpTransport::new(config.timeout)?);
    let dispatcher = Dispatcher::from_config(&config, transport);

    let report = dispatcher.dispatch(&tokens, &notification).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.success {
        bail!("{} of {} deliveries failed.", report.failed, tokens.len());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let opts = Opts::parse();

    let subcommand = opts.subcmd;

    match subcommand {
        SubCommand::Serve { port } => {
            serve(port, Config::from_env()?).await?;
        }
        SubCommand::GenerateVapidKeys => {
            let (public, private) = vapid::generate_keys();
            println!("VAPID_PUBLIC_KEY={}", public);
            println!("VAPID_PRIVATE_KEY={}", private);
        }
        SubCommand::Send {
            tokens,
            subscriptions,
            title,
            body,
            data,
        } => {
            let mut notification = NotificationPayload::new(&title, &body);
            if !data.is_empty() {
                let data: Map<String, Value> = data
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect();
                notification = notification.with_data(data);
            }

            send(tokens, subscriptions, notification).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_entries() {
        assert_eq!(
            parse_key_value("url=https://example.com/a=b"),
            Ok(("url".to_string(), "https://example.com/a=b".to_string()))
        );
        assert!(parse_key_value("no-separator").is_err());
    }

    #[test]
    fn cli_accepts_send_arguments() {
        let opts = Opts::try_parse_from([
            "push-relay",
            "send",
            "--token",
            "abc",
            "--token",
            "def",
            "--title",
            "Hi",
            "--body",
            "Test",
            "--data",
            "url=/inbox",
        ])
        .unwrap();

        match opts.subcmd {
            SubCommand::Send { tokens, data, .. } => {
                assert_eq!(tokens, vec!["abc", "def"]);
                assert_eq!(data, vec![("url".to_string(), "/inbox".to_string())]);
            }
            _ => panic!("expected send"),
        }
    }
}
