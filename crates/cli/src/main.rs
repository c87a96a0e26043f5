//! Rembus command-line client
//!
//! Calls methods, publishes and subscribes to topics, and provisions
//! component identities on a Rembus broker.

mod convert;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rembus::{Arg, ClientConfig, Component, SharedContext};
use tracing_subscriber::EnvFilter;

use crate::convert::{arg_to_json, parse_arg};

/// Broker used when no URL is given.
const DEFAULT_URL: &str = "ws://localhost:8000";

/// Rembus command-line client.
#[derive(Parser, Debug)]
#[command(name = "rembus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Broker URL, optionally ending with the component identity
    #[arg(short, long, global = true, default_value = DEFAULT_URL)]
    pub url: String,

    /// Shared secret used to answer the identity challenge
    #[arg(long, global = true)]
    pub secret: Option<String>,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Call a remote method and print its result
    Rpc {
        method: String,

        /// Arguments as JSON; anything that is not JSON is sent as text
        args: Vec<String>,

        /// Call the method on this component only
        #[arg(long, short)]
        target: Option<String>,
    },

    /// Publish a message on a topic
    Publish {
        topic: String,

        /// Arguments as JSON; anything that is not JSON is sent as text
        args: Vec<String>,
    },

    /// Print messages published on a topic until interrupted
    Subscribe {
        topic: String,

        /// Ask the broker to queue messages while disconnected
        #[arg(long)]
        reactive: bool,
    },

    /// Provision a component identity and store its private key
    Register {
        cid: String,

        /// 8 hexadecimal characters issued by the broker administrator
        pin: String,

        #[arg(long)]
        tenant: Option<String>,
    },

    /// Remove the identity given in the URL and delete its private key
    Unregister,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        ClientConfig::load(config_path)?
    } else {
        ClientConfig::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut builder = Component::builder(&cli.url).config(config);
    if let Some(secret) = &cli.secret {
        builder = builder.secret(secret.as_str());
    }
    let component = builder
        .build()
        .with_context(|| format!("Invalid broker URL: {}", cli.url))?;

    let outcome = run(&component, cli.command).await;
    if !component.close().await? {
        tracing::warn!("connection did not close cleanly");
    }
    outcome
}

async fn run(component: &Component, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Rpc {
            method,
            args,
            target,
        } => {
            let args = args.iter().map(|a| parse_arg(a)).collect();
            let result = match &target {
                Some(target) => component.direct(target, &method, args).await,
                None => component.rpc(&method, args).await,
            }
            .with_context(|| format!("RPC {} failed", method))?;
            println!("{}", arg_to_json(&result));
        }
        Commands::Publish { topic, args } => {
            let args = args.iter().map(|a| parse_arg(a)).collect();
            component
                .publish(&topic, args)
                .await
                .with_context(|| format!("Failed to publish on {}", topic))?;
        }
        Commands::Subscribe { topic, reactive } => {
            let name = topic.clone();
            component
                .subscribe(&topic, move |_ctx: Option<SharedContext>, args: Vec<Arg>| {
                    let name = name.clone();
                    async move {
                        let rendered: Vec<_> = args.iter().map(arg_to_json).collect();
                        println!("{} {}", name, serde_json::Value::Array(rendered));
                        Ok(Arg::null())
                    }
                })
                .await
                .with_context(|| format!("Failed to subscribe to {}", topic))?;
            if reactive {
                component
                    .reactive()
                    .await
                    .context("Failed to enable reactive mode")?;
            }

            tracing::info!(%topic, "listening, press Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to wait for Ctrl+C")?;
        }
        Commands::Register { cid, pin, tenant } => {
            component
                .register(&cid, &pin, tenant.as_deref())
                .await
                .with_context(|| format!("Failed to register {}", cid))?;
            println!("registered {}", cid);
        }
        Commands::Unregister => {
            component
                .unregister()
                .await
                .context("Failed to unregister")?;
            println!("unregistered {}", component.cid().unwrap_or_default());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rpc_command() {
        let cli = Cli::try_parse_from(["rembus", "rpc", "add", "1", "2"]).unwrap();
        assert_eq!(cli.url, DEFAULT_URL);
        match cli.command {
            Commands::Rpc {
                method,
                args,
                target,
            } => {
                assert_eq!(method, "add");
                assert_eq!(args, vec!["1", "2"]);
                assert_eq!(target, None);
            }
            _ => panic!("Expected Rpc command"),
        }
    }

    #[test]
    fn test_rpc_with_target_and_global_url() {
        let cli = Cli::try_parse_from([
            "rembus",
            "rpc",
            "status",
            "--target",
            "server1",
            "--url",
            "ws://broker:8000/me",
        ])
        .unwrap();
        assert_eq!(cli.url, "ws://broker:8000/me");
        match cli.command {
            Commands::Rpc { target, .. } => assert_eq!(target.as_deref(), Some("server1")),
            _ => panic!("Expected Rpc command"),
        }
    }

    #[test]
    fn test_subscribe_reactive() {
        let cli = Cli::try_parse_from(["rembus", "subscribe", "metrics", "--reactive"]).unwrap();
        match cli.command {
            Commands::Subscribe { topic, reactive } => {
                assert_eq!(topic, "metrics");
                assert!(reactive);
            }
            _ => panic!("Expected Subscribe command"),
        }
    }

    #[test]
    fn test_register_command() {
        let cli = Cli::try_parse_from([
            "rembus", "register", "sensor", "11223344", "--tenant", "acme",
        ])
        .unwrap();
        match cli.command {
            Commands::Register { cid, pin, tenant } => {
                assert_eq!(cid, "sensor");
                assert_eq!(pin, "11223344");
                assert_eq!(tenant.as_deref(), Some("acme"));
            }
            _ => panic!("Expected Register command"),
        }
    }

    #[test]
    fn test_register_requires_pin() {
        assert!(Cli::try_parse_from(["rembus", "register", "sensor"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "rembus",
            "-v",
            "--secret",
            "pippo",
            "--config",
            "/tmp/rembus.toml",
            "unregister",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.secret.as_deref(), Some("pippo"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rembus.toml")));
        assert!(matches!(cli.command, Commands::Unregister));
    }
}
