mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use forward_proxy::{tls, ProxyConfig, ProxyServer};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match cli.command {
        Commands::Run {
            config,
            addr,
            cert,
            key,
            ca,
        } => {
            info!("HTTP forward proxy v{}", env!("CARGO_PKG_VERSION"));

            let mut proxy_config = match config {
                Some(path) => {
                    info!("Loading proxy configuration from: {}", path);
                    ProxyConfig::load(&path)?
                }
                None => ProxyConfig::default(),
            };
            proxy_config.apply_overrides(addr, cert, key, ca);

            let server = ProxyServer::bind(&proxy_config)
                .await
                .context("Failed to start proxy")?;

            let shutdown = server.shutdown_handle();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received Ctrl-C, closing listener");
                        shutdown.close();
                    }
                    Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                }
            });

            server.run().await?;
        }
        Commands::Check { config } => {
            check_config(&config)?;
        }
        Commands::Cert {
            cert_out,
            key_out,
            common_name,
            alt_names,
        } => {
            tls::generate_self_signed_cert(
                &common_name,
                &alt_names,
                Path::new(&cert_out),
                Path::new(&key_out),
            )?;

            println!("Generated self-signed certificate: {}", cert_out);
            println!("Generated private key: {}", key_out);
        }
    }

    Ok(())
}

/// Check configuration file format
fn check_config(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);

    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    println!("Checking configuration file: {}\n", config_path);

    match ProxyConfig::load(config_path) {
        Ok(config) => {
            println!("✓ Listen address: {}", config.listen_addr);
            println!("✓ Max header size: {} bytes", config.max_header_size);
            println!("✓ Reply 502 on dial failure: {}", config.reply_on_dial_failure);

            match (&config.cert_path, &config.key_path) {
                (Some(cert), Some(key)) => {
                    for (label, file) in [("Certificate", cert), ("Key", key)] {
                        if file.exists() {
                            println!("✓ {} file: {:?}", label, file);
                        } else {
                            println!("⚠ Warning: {} file not found: {:?}", label, file);
                        }
                    }
                    if let Some(ref ca) = config.ca_path {
                        if ca.exists() {
                            println!("✓ CA certificate file: {:?}", ca);
                        } else {
                            println!("⚠ Warning: CA certificate file not found: {:?}", ca);
                        }
                    }
                }
                _ => println!("✓ Transport: plain TCP"),
            }

            println!("\n✓ Proxy configuration is valid!");
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed!");
            println!("\nError details:");
            println!("{:#}", e);
            Err(e)
        }
    }
}
