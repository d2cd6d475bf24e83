//! Companion tool: key management plus publishing and querying against a
//! configured relay.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};

use nostr_relay::keys::{generate_secret_key, public_key_hex};
use nostr_relay::{Client, Event, Filter};

#[derive(Parser)]
#[command(name = "nostr-cli", about = "Publish to and query a Nostr relay")]
struct Cli {
    /// Config file
    #[arg(long, global = true, default_value = "config.json")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage keys
    #[command(subcommand)]
    Key(KeyCommand),
    /// Configure the relay to talk to
    #[command(subcommand)]
    Relay(RelayCommand),
    /// Sign and publish an event
    #[command(subcommand)]
    Publish(PublishCommand),
    /// Query stored events
    Query {
        #[arg(long)]
        kind: Option<i64>,
        #[arg(long)]
        pubkey: Option<String>,
    },
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Generate a new key
    Generate {
        /// Save the key to the config file
        #[arg(long)]
        save: bool,
    },
    /// Show the current public key
    Show,
}

#[derive(Subcommand)]
enum RelayCommand {
    Set { url: String },
}

#[derive(Subcommand)]
enum PublishCommand {
    /// Publish a kind-0 metadata event
    Metadata {
        #[arg(long)]
        name: String,
        #[arg(long)]
        about: String,
    },
    /// Publish a kind-1 text note
    Note {
        #[arg(long)]
        content: String,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Config {
    #[serde(rename = "Key", skip_serializing_if = "Option::is_none")]
    key: Option<Vec<u8>>,
    #[serde(rename = "Relay", skip_serializing_if = "Option::is_none")]
    relay: Option<String>,
}

impl Config {
    fn load(path: &str) -> Config {
        std::fs::read(path)
            .ok()
            .and_then(|buf| serde_json::from_slice(&buf).ok())
            .unwrap_or_default()
    }

    fn save(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let buf = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, buf)?;
        Ok(())
    }

    fn secret_key(&self) -> Result<SecretKey, Box<dyn std::error::Error>> {
        let bytes = self.key.as_deref().ok_or("no key in config")?;
        Ok(SecretKey::from_slice(bytes)?)
    }

    fn relay_url(&self) -> Result<&str, Box<dyn std::error::Error>> {
        Ok(self.relay.as_deref().ok_or("no relay in config")?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Key(KeyCommand::Generate { save }) => {
            let key = generate_secret_key();
            println!("Public Key: {}", public_key_hex(&key));
            let raw = key.secret_bytes().to_vec();
            println!("Private Key: {}", serde_json::to_string(&raw)?);
            if save {
                let mut config = Config::load(&cli.config);
                config.key = Some(raw);
                config.save(&cli.config)?;
            }
        }
        Command::Key(KeyCommand::Show) => {
            let config = Config::load(&cli.config);
            println!("Public Key: {}", public_key_hex(&config.secret_key()?));
        }
        Command::Relay(RelayCommand::Set { url }) => {
            let mut config = Config::load(&cli.config);
            config.relay = Some(url);
            config.save(&cli.config)?;
        }
        Command::Publish(PublishCommand::Metadata { name, about }) => {
            let content = serde_json::json!({ "name": name, "about": about }).to_string();
            publish(&cli.config, 0, content).await?;
        }
        Command::Publish(PublishCommand::Note { content }) => {
            publish(&cli.config, 1, content).await?;
        }
        Command::Query { kind, pubkey } => {
            let config = Config::load(&cli.config);
            let client = Client::connect(config.relay_url()?).await?;
            let filter = Filter {
                kinds: kind.into_iter().collect(),
                authors: pubkey.into_iter().collect(),
                limit: 100,
                ..Default::default()
            };
            let mut subscription = client.subscribe(vec![filter]).await?;
            subscription.end_of_stored_events().await;
            loop {
                match tokio::time::timeout(Duration::from_millis(100), subscription.recv()).await
                {
                    Ok(Some(event)) => println!("{}", serde_json::to_string_pretty(&event)?),
                    Ok(None) | Err(_) => break,
                }
            }
            client.close().await;
        }
    }
    Ok(())
}

async fn publish(
    config_path: &str,
    kind: i64,
    content: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path);
    let key = config.secret_key()?;

    let mut event = Event {
        kind,
        content,
        created_at: SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64,
        ..Default::default()
    };
    event.sign(&key)?;

    let client = Client::connect(config.relay_url()?).await?;
    client.publish(&event).await?;
    println!("published {}", event.id);
    // give the writer task a moment to flush before the process exits
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.close().await;
    Ok(())
}
