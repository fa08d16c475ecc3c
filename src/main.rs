//! `serial-transport` command-line tool.
//!
//! # Usage
//!
//! ```bash
//! serial-transport list
//! serial-transport check /dev/ttyUSB0
//! serial-transport echo COM3 "hello" --baud 115200
//! serial-transport monitor COM3 --seconds 30
//! serial-transport config
//! ```

use clap::{Parser, Subcommand};
use serde_json::json;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use serial_transport::config::{Config, ConfigLoader};
use serial_transport::port::{
    available_ports, DataBits, EventMonitor, Parity, SerialPort, StopBits,
};
use serial_transport::{logging, runtime, Timeout};

#[derive(Parser, Debug)]
#[command(
    name = "serial-transport",
    version,
    about = "Probe, exercise and monitor serial ports."
)]
struct Cli {
    /// Configuration file (overrides the normal resolution order).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the serial devices reported by the operating system.
    List,
    /// Report whether a device can be opened.
    Check { name: String },
    /// Write text to a device and read back whatever arrives.
    Echo {
        name: String,
        text: String,
        #[arg(long)]
        baud: Option<u32>,
        /// Read-back timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print comm events raised by a device.
    Monitor {
        name: String,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Print the effective configuration.
    Config {
        /// Also write it to this path.
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut loader = match cli.config {
        Some(ref path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(ref level) = cli.log_level {
        loader.config_mut().logging.level = level.clone();
    }
    logging::init(&loader.config().logging)?;

    let config = loader.config().clone();
    let _runtime = runtime::initialize(config.to_transport_config())?;

    match cli.command {
        Command::List => list(cli.json),
        Command::Check { ref name } => check(&config, name, cli.json),
        Command::Echo {
            ref name,
            ref text,
            baud,
            timeout_ms,
        } => echo(&config, name, text, baud, timeout_ms, cli.json),
        Command::Monitor { ref name, seconds } => monitor(&config, name, seconds, cli.json),
        Command::Config { ref save } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if let Some(path) = save {
                loader.save_to(path)?;
                info!(path = %path.display(), "Configuration saved");
            }
            Ok(())
        }
    }
}

fn list(as_json: bool) -> Result<(), Box<dyn Error>> {
    let ports = available_ports()?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{:<24} {:<10} {:04x}:{:04x} {}",
                port.name,
                port.transport,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{:<24} {}", port.name, port.transport),
        }
    }
    Ok(())
}

fn check(config: &Config, name: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let device = config.serial.resolve_port(name);
    let availability = SerialPort::check_port(&device);
    if as_json {
        println!(
            "{}",
            json!({ "port": device, "availability": availability })
        );
    } else {
        println!("{device}: {availability:?}");
    }
    Ok(())
}

fn open_configured(config: &Config, name: &str) -> Result<SerialPort, Box<dyn Error>> {
    let device = config.serial.resolve_port(name);
    let port = SerialPort::new();
    port.open(
        device.as_str(),
        config.transport.in_queue_size,
        config.transport.out_queue_size,
        config.transport.io_mode,
    )?;
    Ok(port)
}

fn echo(
    config: &Config,
    name: &str,
    text: &str,
    baud: Option<u32>,
    timeout_ms: Option<u64>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let port = open_configured(config, name)?;
    port.setup(
        baud.unwrap_or(config.serial.default_baud),
        DataBits::Eight,
        Parity::None,
        StopBits::One,
        true,
        true,
    )?;
    port.set_read_mode(config.serial.read_mode)?;
    port.purge()?;

    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.serial.default_timeout());
    let written = port.write_str(text, Timeout::from(timeout))?;
    if written < text.len() {
        warn!(written, expected = text.len(), "Write timed out");
    }

    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    let deadline = Instant::now() + timeout;
    while received.len() < written && Instant::now() < deadline {
        let n = port.read(&mut buf, Timeout::from(Duration::from_millis(50)))?;
        if n == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
        received.extend_from_slice(&buf[..n]);
    }
    port.close()?;

    let received = String::from_utf8_lossy(&received);
    if as_json {
        println!(
            "{}",
            json!({ "written": written, "received": received, "matched": received == text })
        );
    } else {
        println!("wrote {written} bytes, read back {:?}", received);
    }
    Ok(())
}

fn monitor(config: &Config, name: &str, seconds: u64, as_json: bool) -> Result<(), Box<dyn Error>> {
    let port = Arc::new(open_configured(config, name)?);
    let started = Instant::now();
    let monitor = EventMonitor::start_with_priority(
        Arc::clone(&port),
        config.threads.monitor_priority,
        move |events| {
            let elapsed = started.elapsed().as_millis() as u64;
            if as_json {
                println!(
                    "{}",
                    json!({ "elapsed_ms": elapsed, "events": format!("{events:?}") })
                );
            } else {
                println!("{elapsed:>8} ms  {events:?}");
            }
        },
    )?;

    std::thread::sleep(Duration::from_secs(seconds));
    if !monitor.stop() {
        warn!("Event monitor had to be abandoned");
    }
    port.close()?;
    Ok(())
}
