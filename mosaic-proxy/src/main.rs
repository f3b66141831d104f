mod config;
mod filter;
mod hooks;
mod listener;
mod proxy;

use crate::config::ProxyConfig;
use crate::filter::FilterRegistry;
use crate::listener::Listener;
use clap::{Parser, ValueEnum};
use mosaic_tls::HookRegistry;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

/// Mosaic Proxy - TLS-terminating service-mesh proxy
#[derive(Parser)]
#[command(name = "mosaic-proxy")]
#[command(version)]
#[command(about = "Mosaic Proxy - TLS-terminating service-mesh proxy")]
pub struct Args {
    /// Path to the proxy configuration file
    #[arg(long, short, env = "MOSAIC_CONFIG", default_value = "/etc/mosaic/mosaic.toml")]
    pub config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn install_rustls_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return;
    }

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    install_rustls_crypto_provider();

    let args = Args::parse();
    init_tracing(args.log_format);

    tracing::info!("Mosaic Proxy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config: {}", args.config.display());

    let config = ProxyConfig::load_from_file(&args.config)?;

    // Hooks must be registered before any listener builds its TLS state
    let mut hook_registry = HookRegistry::new();
    hooks::register_builtin(&mut hook_registry)?;
    let filters = FilterRegistry::with_defaults();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, hook_registry, filters))
}

async fn run(
    config: ProxyConfig,
    hooks: HookRegistry,
    filters: FilterRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut listeners = Vec::with_capacity(config.listeners.len());
    for listener_config in &config.listeners {
        listeners.push(Listener::bind(listener_config, &hooks, &filters).await?);
    }

    let mut tasks = JoinSet::new();
    for listener in listeners {
        let name = listener.name().to_string();
        tasks.spawn(async move { (name, listener.run().await) });
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                tasks.shutdown().await;
                return Ok(());
            }
            joined = tasks.join_next() => match joined {
                Some(Ok((name, Err(e)))) => {
                    tracing::error!("Listener '{}' stopped: {}", name, e);
                }
                Some(Ok((name, Ok(())))) => {
                    tracing::info!("Listener '{}' finished", name);
                }
                Some(Err(e)) => {
                    tracing::error!("Listener task failed: {}", e);
                }
                None => return Err("all listeners stopped".into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_rustls_crypto_provider_is_idempotent() {
        install_rustls_crypto_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());

        install_rustls_crypto_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }

    #[test]
    fn args_default_to_text_logs() {
        let args = Args::try_parse_from(["mosaic-proxy", "--config", "/tmp/mosaic.toml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/tmp/mosaic.toml"));
        assert_eq!(args.log_format, LogFormat::Text);

        let args = Args::try_parse_from(["mosaic-proxy", "-c", "m.toml", "--log-format", "json"])
            .unwrap();
        assert_eq!(args.log_format, LogFormat::Json);
    }
}
