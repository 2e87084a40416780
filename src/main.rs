use anyhow::{Context, Result};
use log::{error, info};
use st7789_shim::bringup::Bringup;
use st7789_shim::config::Config;
use std::path::PathBuf;

fn main() -> Result<()> {
    // Initialize logging
    init_logger();

    // Usage: st7789-shim [config.yaml] [hex bytes...]
    let mut args = std::env::args().skip(1);
    let config_path = PathBuf::from(
        args.next()
            .unwrap_or_else(|| "/etc/st7789-shim/config.yaml".to_string()),
    );
    let payload = args
        .map(|arg| parse_byte(&arg))
        .collect::<Result<Vec<u8>>>()?;

    info!("ST7789 shim starting...");
    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)?;

    let mut display = Bringup::start(&config)?;

    let transfer = match payload.split_first() {
        Some((cmd, data)) => {
            info!("Sending command 0x{:02x} with {} data byte(s)", cmd, data.len());
            display.command(*cmd).and_then(|_| display.data(data))
        }
        None => Ok(()),
    };
    if let Err(e) = &transfer {
        error!("Transfer failed: {:#}", e);
    }

    finish(transfer, display.shutdown())?;
    info!("ST7789 shim done");
    Ok(())
}

/// A transfer error takes precedence over a shutdown error, which is logged.
fn finish(transfer: Result<()>, shutdown: Result<()>) -> Result<()> {
    match (transfer, shutdown) {
        (Err(e), Err(shutdown_err)) => {
            error!("Shutdown after failed transfer also failed: {:#}", shutdown_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), shutdown) => shutdown,
    }
}

fn parse_byte(arg: &str) -> Result<u8> {
    let digits = arg
        .strip_prefix("0x")
        .or_else(|| arg.strip_prefix("0X"))
        .unwrap_or(arg);
    u8::from_str_radix(digits, 16).context(format!("Invalid hex byte: {}", arg))
}

fn init_logger() {
    // Use `env_logger` for logging. Systemd/journald will capture stdout/stderr.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}
