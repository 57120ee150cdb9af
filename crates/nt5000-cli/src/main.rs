//! `nt5000` command line tool
//!
//! Reads telemetry, identity, clock and error log from an NT5000 inverter,
//! or plays the inverter's part on a serial port.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nt5000_core::config::Config;
use nt5000_core::emulator::Emulator;
use nt5000_core::poller::spawn_poller;
use nt5000_core::protocol::{
    list_ports, open_port, ClockSetScheme, CloseHandle, DataPoint, Dispatcher, FrameReader,
    MemoryTransport, ProtocolError, TcpTransport, Transport, ERROR_LOG_SLOTS,
};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "NT5000 inverter RS-232 tool", long_about = None)]
struct Cli {
    /// Serial port of the inverter, or tcp://host:port for a network bridge
    #[arg(short, long, global = true, env = "NT5000_TTY")]
    tty: Option<String>,

    /// Use the built-in emulator instead of a serial port
    #[arg(short, long, global = true)]
    emulate: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Clock-set numbering: legacy or revised
    #[arg(long, global = true)]
    scheme: Option<ClockSetScheme>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List serial ports
    Ports,
    /// Poll and print readings until interrupted
    Display {
        /// Seconds between polls (1-100)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Print one reading as JSON
    Json,
    /// Read the inverter clock, or set it to the local time
    Datetime {
        #[arg(long)]
        set: bool,
    },
    /// Print the error log
    Errors,
    /// Answer as an inverter on the given port
    Emulator,
}

type Inverter = Dispatcher<Box<dyn Transport>>;

/// Emulator running on a thread behind an in-memory link
struct LocalDevice {
    close: CloseHandle,
    thread: JoinHandle<Result<(), ProtocolError>>,
}

impl LocalDevice {
    fn stop(self) {
        self.close.close();
        match self.thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("emulator ended with error: {}", e),
            Err(_) => warn!("emulator thread panicked"),
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(tty) = &cli.tty {
        config.port = Some(tty.clone());
    }
    if cli.emulate {
        config.emulate = true;
    }
    if let Some(scheme) = cli.scheme {
        config.clock_scheme = scheme;
    }
    Ok(config)
}

fn connect(config: &Config) -> Result<(Inverter, Option<LocalDevice>)> {
    let timeout = Duration::from_millis(config.timeout_ms);

    if config.emulate {
        let (host, device) = MemoryTransport::pair();
        let mut reader = FrameReader::new(device, timeout);
        let close = reader.close_handle();
        let scheme = config.clock_scheme;
        let thread = thread::Builder::new()
            .name("nt5000-emulator".to_string())
            .spawn(move || Emulator::new(scheme).run(&mut reader))
            .context("Failed to start emulator")?;
        let transport: Box<dyn Transport> = Box::new(host);
        return Ok((
            Dispatcher::new(transport, timeout, config.clock_scheme),
            Some(LocalDevice { close, thread }),
        ));
    }

    let Some(port) = config.port.as_deref() else {
        bail!("No serial port given; use --tty or --emulate");
    };
    let transport: Box<dyn Transport> = match port.strip_prefix("tcp://") {
        Some(addr) => Box::new(
            TcpTransport::connect(addr).with_context(|| format!("Failed to connect to {addr}"))?,
        ),
        None => Box::new(open_port(port, config.baud_rate)?),
    };
    Ok((
        Dispatcher::new(transport, timeout, config.clock_scheme),
        None,
    ))
}

fn print_data_point(point: &DataPoint, suspect: bool) {
    println!(
        "{}{}",
        point.timestamp.format("%Y-%m-%d %H:%M:%S"),
        if suspect { "  (checksum error)" } else { "" }
    );
    println!(
        "  DC  {:6.1} V  {:6.2} A  {:6.3} kW",
        point.dc.voltage, point.dc.current, point.dc.power
    );
    println!(
        "  AC  {:6.1} V  {:6.2} A  {:6.3} kW",
        point.ac.voltage, point.ac.current, point.ac.power
    );
    println!("  Temperature   {:6.0} °C", point.temperature);
    println!("  Heat flux     {:6.0} W/m²", point.heat_flux);
    println!("  Energy today  {:9.3} kWh", point.energy_today);
    println!("  Energy total  {:6.0} kWh", point.energy_total);
}

fn print_identity(inverter: &mut Inverter) -> Result<()> {
    let serial = inverter.read_serial_number()?.value;
    let version = inverter.read_protocol_version()?.value;
    println!(
        "Inverter {} (protocol {}, firmware {})",
        serial, version.protocol, version.firmware
    );
    Ok(())
}

async fn display(inverter: Inverter, interval: Duration) -> Result<()> {
    let poller = spawn_poller(inverter, interval);
    let mut latest = poller.latest();

    loop {
        tokio::select! {
            changed = latest.changed() => {
                if !changed {
                    bail!("Polling stopped");
                }
                if let Some(snapshot) = latest.get() {
                    print_data_point(&snapshot.reading, snapshot.suspect);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    poller.shutdown();
    Ok(())
}

fn datetime(inverter: &mut Inverter, set: bool) -> Result<()> {
    if set {
        let now = chrono::Local::now();
        inverter.set_clock(&now)?;
        println!("Clock set to {}", now.format("%Y-%m-%d %H:%M"));
        return Ok(());
    }

    let clock = inverter.read_clock()?.value;
    match clock.to_datetime() {
        Some(time) => println!("{}", time.format("%Y-%m-%d %H:%M")),
        None => println!("Invalid device clock: {:?}", clock),
    }
    Ok(())
}

fn errors(inverter: &mut Inverter) -> Result<()> {
    let mut count = 0;
    for slot in ERROR_LOG_SLOTS {
        let reading = inverter.read_error_log(slot)?;
        for entry in reading.value {
            count += 1;
            let when = entry
                .timestamp
                .to_datetime()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "????-??-?? ??:??".to_string());
            println!("{}  error {:#04x}", when, entry.code);
        }
    }
    if count == 0 {
        println!("Error log is empty");
    }
    Ok(())
}

async fn serve(config: &Config) -> Result<()> {
    let Some(port) = config.port.clone() else {
        bail!("The emulator needs a serial port; use --tty");
    };
    let transport = open_port(&port, config.baud_rate)?;
    let mut reader = FrameReader::new(transport, Duration::from_millis(config.timeout_ms));
    let close = reader.close_handle();
    let scheme = config.clock_scheme;

    let mut task =
        tokio::task::spawn_blocking(move || Emulator::new(scheme).run(&mut reader));

    tokio::select! {
        result = &mut task => return Ok(result??),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    close.close();
    task.await??;
    Ok(())
}

fn print_json(inverter: &mut Inverter) -> Result<()> {
    let point = match inverter.read_data_point() {
        Ok(reading) => reading.value,
        Err(e @ ProtocolError::MalformedFrameLength { .. }) => {
            warn!("{}, reporting a zero reading", e);
            DataPoint::zero(chrono::Local::now())
        }
        Err(e) => return Err(e.into()),
    };
    println!("{}", serde_json::to_string_pretty(&point)?);
    Ok(())
}

fn list() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let kind = if port.is_usb() { "usb" } else { "serial" };
        match port.product() {
            Some(product) => println!("{:<16} {:<7} {}", port.name, kind, product),
            None => println!("{:<16} {}", port.name, kind),
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;

    if let Commands::Ports = cli.command {
        list();
        return Ok(());
    }
    if let Commands::Emulator = cli.command {
        return tokio::runtime::Runtime::new()?.block_on(serve(&config));
    }

    let (mut inverter, device) = connect(&config)?;
    let result = match cli.command {
        Commands::Display { interval } => {
            if let Some(secs) = interval {
                config.poll_interval_secs = secs;
            }
            print_identity(&mut inverter).and_then(|()| {
                tokio::runtime::Runtime::new()?.block_on(display(inverter, config.poll_interval()))
            })
        }
        Commands::Json => print_json(&mut inverter),
        Commands::Datetime { set } => datetime(&mut inverter, set),
        Commands::Errors => errors(&mut inverter),
        Commands::Ports | Commands::Emulator => Ok(()),
    };

    if let Some(device) = device {
        device.stop();
    }
    result
}

fn main() -> Result<()> {
    init_logging();
    run(Cli::parse())
}
