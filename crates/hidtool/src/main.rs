//! hidtool
//!
//! Sends one request packet to a HID device and prints its reply.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use common::{hex_lines, setup_logging};
use hidlink::config::{LinkConfig, parse_usb_id};
use hidlink::{Error, Session};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "hidtool")]
#[command(author, version, about = "Exchange request/reply packets with a USB HID device")]
#[command(long_about = "
Sends a request to a USB HID device as an output report (Set_Report) and
waits for the reply on the interrupt-IN endpoint. Timed-out reads are
repeated until the device answers, or until --max-attempts is reached.

EXAMPLES:
    # Send two bytes, expect an 8 byte reply
    hidtool --vid 0x0483 --pid 0xdf11 --reply-len 8 01 02

    # Give up after 10 timed-out reads, dump packets
    hidtool --max-attempts 10 --log-level trace 01 02

CONFIGURATION:
    The tool looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/hidlink/hidlink.toml
    3. /etc/hidlink/hidlink.toml
    4. Built-in defaults
    Command-line options override the file.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save the effective configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// USB vendor ID (hex)
    #[arg(long, value_name = "VID", value_parser = parse_usb_id)]
    vid: Option<u16>,

    /// USB product ID (hex)
    #[arg(long, value_name = "PID", value_parser = parse_usb_id)]
    pid: Option<u16>,

    /// HID interface number
    #[arg(long, value_name = "N")]
    interface: Option<u8>,

    /// Receive and control transfer timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Give up after this many timed-out reads (default: retry forever)
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,

    /// Expected reply length in bytes (default: report size)
    #[arg(short, long, value_name = "BYTES")]
    reply_len: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Request bytes in hex, e.g. `01 02 ff`
    #[arg(value_name = "BYTE", value_parser = parse_hex_byte)]
    request: Vec<u8>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if let Some(ref path) = args.config {
        LinkConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        LinkConfig::load_or_default()
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    if args.save_config {
        let path = LinkConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    setup_logging(&config.logging.log_level).context("Failed to setup logging")?;
    info!("hidtool v{}", env!("CARGO_PKG_VERSION"));

    if args.request.is_empty() {
        bail!("No request bytes given");
    }

    let reply_len = args.reply_len.unwrap_or(config.transfer.report_size);
    let reply = exchange(&config, &args.request, reply_len)?;

    for line in hex_lines(&reply) {
        println!("{}", line);
    }
    Ok(())
}

/// Open the device, run one transaction, close it again
fn exchange(config: &LinkConfig, request: &[u8], reply_len: usize) -> Result<Vec<u8>> {
    let mut session = match Session::open(config) {
        Ok(session) => session,
        Err(e @ Error::DeviceNotFound { .. }) => {
            return Err(anyhow!(e).context("Is the device connected and powered?"));
        }
        Err(e) => return Err(anyhow!(e).context("Failed to open HID session")),
    };
    debug!("Session open: {:?}", session);

    let mut reply = vec![0u8; reply_len];
    let result = session.send_recv(request, &mut reply);
    session.close();

    result.context("Transaction failed")?;
    Ok(reply)
}

fn apply_overrides(config: &mut LinkConfig, args: &Args) {
    if let Some(vid) = args.vid {
        config.device.vendor_id = vid;
    }
    if let Some(pid) = args.pid {
        config.device.product_id = pid;
    }
    if let Some(interface) = args.interface {
        config.device.interface = interface;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.transfer.timeout_ms = timeout_ms;
    }
    if args.max_attempts.is_some() {
        config.transfer.max_attempts = args.max_attempts;
    }
    if let Some(ref level) = args.log_level {
        config.logging.log_level = level.clone();
    }
}

/// Parse one request byte: `1f`, `0x1f`
fn parse_hex_byte(text: &str) -> std::result::Result<u8, String> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 2 {
        return Err(format!("Invalid byte '{}', expected 1-2 hex digits", text));
    }
    u8::from_str_radix(digits, 16).map_err(|e| format!("Invalid byte '{}': {}", text, e))
}
