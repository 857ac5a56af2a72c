use anyhow::{Context, bail};
use clap::Parser;
use hopgate::config::{Config, LogFormat, LogLevel};
use hopgate::logging::{self, parse_log_format, parse_log_level};
use hopgate::ForwardProxy;
use log::{error, info};
use std::net::SocketAddr;
use std::path::Path;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Single-hop HTTP forwarding proxy"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (default: 0.0.0.0:8888)")]
    listen: Option<SocketAddr>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path (JSON)")]
    config: Option<String>,

    #[clap(long, value_name = "LEVEL", value_parser = parse_log_level, help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<LogLevel>,

    #[clap(long, value_name = "FORMAT", value_parser = parse_log_format, help = "Log format: text or json")]
    log_format: Option<LogFormat>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        Config::default()
            .to_file(config_file)
            .with_context(|| format!("Failed to write sample configuration to {}", config_file))?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let config = load_config(&args)?;
    config.validate()?;

    logging::init(config.log_level, config.log_format).context("Failed to initialize logging")?;

    let proxy = ForwardProxy::new();
    let listen_addr = config.listen_addr;

    let server_handle = tokio::spawn(async move { proxy.run(listen_addr).await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = server_handle => {
            match result {
                Ok(Err(e)) => {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                    return Err(e.into());
                }
                Ok(Ok(())) => {}
            }
        }
    }

    info!("Proxy server stopped");
    Ok(())
}

/// Defaults, then the config file, then command-line flags.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(config_file) => {
            if !Path::new(config_file).exists() {
                bail!("Configuration file not found: {}", config_file);
            }
            Config::from_file(config_file)?
        }
        None => Config::default(),
    };

    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hopgate.json");
        std::fs::write(&path, r#"{ "listen_addr": "127.0.0.1:3128", "log_level": "debug" }"#).unwrap();
        let path = path.to_str().unwrap();

        let args = Args::parse_from(["hopgate", "--config", path, "--log-level", "warn"]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:3128".parse().unwrap());
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_missing_config_file_rejected() {
        let args = Args::parse_from(["hopgate", "--config", "/nonexistent/hopgate.json"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_listen_flag_overrides_default() {
        let args = Args::parse_from(["hopgate", "-l", "127.0.0.1:9000"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
    }
}
