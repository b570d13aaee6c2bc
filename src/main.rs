use clap::Parser;
use serial_device::config::{Config, ConfigLoader};
use serial_device::port::{list_ports, port_name, LoopbackTransport, NativeTransport, Transport};
use serial_device::{ByteSize, ReceiveEvent, SerialDevice, StopBits};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "serial-monitor",
    version,
    about = "Open a serial port, send optional commands and print everything received.",
    long_about = "Opens a serial port with the configured line settings, runs the background receive loop and prints each received chunk until the duration elapses or Ctrl+C is pressed."
)]
struct Args {
    /// List the serial ports known to the system and exit.
    #[arg(short, long)]
    list: bool,

    /// Port to open: a device path, a configured alias or a COM number.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overriding the configuration.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits per character (7 or 8).
    #[arg(long, value_parser = parse_byte_size)]
    byte_size: Option<ByteSize>,

    /// Stop bits (1, 1.5 or 2).
    #[arg(long, value_parser = parse_stop_bits)]
    stop_bits: Option<StopBits>,

    /// Configuration file, instead of the standard search path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data to send after opening; accepts \r \n \t \0 \\ and \xHH escapes.
    /// May be repeated.
    #[arg(short, long)]
    send: Vec<String>,

    /// Print received bytes as hex.
    #[arg(long)]
    hex: bool,

    /// Stop after this many milliseconds instead of waiting for Ctrl+C.
    #[arg(short, long)]
    duration_ms: Option<u64>,

    /// Use an in-memory loop-back port instead of real hardware.
    #[arg(long)]
    loopback: bool,
}

fn parse_byte_size(value: &str) -> Result<ByteSize, String> {
    let bits: u8 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    ByteSize::try_from(bits).map_err(|bits| format!("{} data bits not supported; use 7 or 8", bits))
}

fn parse_stop_bits(value: &str) -> Result<StopBits, String> {
    match value {
        "1" => Ok(StopBits::One),
        "1.5" => Ok(StopBits::OnePointFive),
        "2" => Ok(StopBits::Two),
        other => Err(format!("'{}' stop bits not supported; use 1, 1.5 or 2", other)),
    }
}

/// Expand backslash escapes in a `--send` argument.
fn unescape(input: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'0') => out.push(0),
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let hi = bytes.next();
                let lo = bytes.next();
                let digits = match (hi, lo) {
                    (Some(hi), Some(lo)) => [hi, lo],
                    _ => return Err("\\x needs two hex digits".to_string()),
                };
                let text = std::str::from_utf8(&digits).map_err(|e| e.to_string())?;
                let value = u8::from_str_radix(text, 16)
                    .map_err(|_| format!("invalid hex escape \\x{}", text))?;
                out.push(value);
            }
            Some(other) => return Err(format!("unknown escape \\{}", other as char)),
            None => return Err("trailing backslash".to_string()),
        }
    }
    Ok(out)
}

/// Resolve `--port`: aliases first, then bare COM numbers.
fn resolve_port(config: &Config, requested: &str) -> String {
    let resolved = config.serial.resolve_port(requested);
    if resolved != requested {
        return resolved;
    }
    match requested.parse::<u16>() {
        Ok(number) => port_name(number),
        Err(_) => resolved,
    }
}

fn format_event(event: &ReceiveEvent, hex: bool) -> String {
    let body = if hex {
        event
            .bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        String::from_utf8_lossy(&event.bytes).escape_debug().to_string()
    };
    format!(
        "[{}] {:>4} bytes: {}",
        event.received_at.format("%H:%M:%S%.3f"),
        event.len(),
        body
    )
}

fn print_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => println!(
                "{}  USB {:04x}:{:04x} {}",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.product.unwrap_or_default()
            ),
            other => println!("{}  {:?}", port.port_name, other),
        }
    }
    Ok(())
}

// --- Main Application Entry Point ---
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config = loader.into_config();
    serial_device::logging::init(&config.logging);

    if args.list {
        return print_ports();
    }

    let Some(requested) = args.port.as_deref().or(config.testing.port.as_deref()) else {
        return Err("no port given; use --port or --list".into());
    };
    let port_id = resolve_port(&config, requested);

    let mut settings = config.device_settings();
    if let Some(baud) = args.baud {
        settings.line.baud_rate = baud;
    }
    if let Some(byte_size) = args.byte_size {
        settings.line.byte_size = byte_size;
    }
    if let Some(stop_bits) = args.stop_bits {
        settings.line.stop_bits = stop_bits;
    }

    let payloads = args
        .send
        .iter()
        .map(|s| unescape(s))
        .collect::<Result<Vec<_>, _>>()?;

    let transport: Box<dyn Transport> = if args.loopback {
        Box::new(LoopbackTransport::new().with_port(port_id.clone()))
    } else {
        Box::new(NativeTransport::new())
    };

    let mut device = SerialDevice::open(transport.as_ref(), &port_id, &settings)?;
    let hex = args.hex;
    device.subscribe(move |event| println!("{}", format_event(event, hex)));
    device.start_receiving()?;
    info!("Monitoring {} at {} baud", port_id, settings.line.baud_rate);

    for payload in &payloads {
        let written = device.write(payload)?;
        if written < payload.len() {
            warn!("Only {} of {} bytes written to {}", written, payload.len(), port_id);
        }
    }

    let deadline = async {
        match args.duration_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            println!("\nSignal received, closing {}...", port_id);
        },
        _ = deadline => {},
    }

    device.close()?;
    Ok(())
}
