//! Serline CLI - Command-line interface
//!
//! Interactive terminal and one-shot sender on top of a self-healing
//! serial session.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::RecvTimeoutError;
use serline_core::cli::print_exit_codes;
use serline_core::config::{self, Profile, SessionConfig};
use serline_core::{
    list_ports, CliResult, ExitCodes, FlowControlMode, LineSettings, Parity, SerialEvent, Session,
    StopBits,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Raw bytes / human-readable text
    Text,
    /// JSON format for scripting
    Json,
    /// Hex dump
    Hex,
}

/// Line ending style
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LineEnding {
    /// CR+LF (Windows)
    Crlf,
    /// LF only (Unix)
    Lf,
    /// CR only (old Mac)
    Cr,
    /// No line ending
    None,
}

impl LineEnding {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Crlf => b"\r\n",
            Self::Lf => b"\n",
            Self::Cr => b"\r",
            Self::None => b"",
        }
    }
}

/// Serline CLI
#[derive(Parser, Debug)]
#[command(name = "serline", version, about = "Self-healing serial line terminal", long_about = None)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Also write logs to daily files in this directory
    #[arg(long, env = "SERLINE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Write logs to the default log directory
    #[arg(long, conflicts_with = "log_dir")]
    log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Open a line and bridge it to stdin/stdout
    Connect {
        #[command(flatten)]
        line: LineArgs,

        /// Line ending appended to each stdin line
        #[arg(long, value_enum, default_value_t = LineEnding::Crlf)]
        line_ending: LineEnding,

        /// Stdin lines are hex strings
        #[arg(long)]
        hex_input: bool,

        /// Echo sent lines to stderr
        #[arg(long)]
        echo: bool,

        /// Exit after timeout (seconds)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Send one payload, print the response and exit
    Send {
        #[command(flatten)]
        line: LineArgs,

        /// Payload (text, or hex with --hex)
        data: String,

        /// Payload is a hex string
        #[arg(long)]
        hex: bool,

        /// Line ending appended to a text payload
        #[arg(long, value_enum, default_value_t = LineEnding::Crlf)]
        line_ending: LineEnding,

        /// Response window (ms)
        #[arg(short, long, default_value = "1000")]
        wait: u64,

        /// Fail with a timeout exit code when nothing arrives
        #[arg(long)]
        expect_response: bool,
    },

    /// Save line settings as a named profile
    SaveProfile {
        /// Profile name
        name: String,

        #[command(flatten)]
        line: LineArgs,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Args, Debug)]
struct LineArgs {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    /// Profile name or path to a profile file
    #[arg(long)]
    profile: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits (5-8)
    #[arg(long, default_value = "8")]
    data_bits: u8,

    /// Parity (none, odd, even, mark, space)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1, 1.5, 2)
    #[arg(long, default_value = "1")]
    stop_bits: String,

    /// Flow control (none, hw, sw, hw-sw, manual, rs485)
    #[arg(long, default_value = "none")]
    flow: String,

    /// RTS level in manual flow control
    #[arg(long)]
    rts: bool,

    /// DTR level in manual flow control
    #[arg(long)]
    dtr: bool,

    /// Replace bytes received with parity errors by this character
    #[arg(long)]
    parity_replace: Option<char>,

    /// Do not reopen the line after the device vanishes
    #[arg(long)]
    no_reopen: bool,

    /// Reopen interval (ms)
    #[arg(long, default_value = "1000")]
    reopen_ms: u64,
}

impl LineArgs {
    /// Settings from a profile (port overridable) or from the flags
    fn resolve(&self) -> Result<(LineSettings, SessionConfig), CliResult> {
        if let Some(profile) = &self.profile {
            let path = PathBuf::from(profile);
            let path = if path.exists() {
                path
            } else {
                config::profile_path(profile)
                    .ok_or_else(|| CliResult::error(ExitCodes::CONFIG_ERROR, "No config directory"))?
            };
            let mut loaded = Profile::load(&path)?;
            if let Some(port) = &self.port {
                loaded.line.port.clone_from(port);
            }
            return Ok((loaded.line, loaded.session));
        }

        let port = self
            .port
            .as_deref()
            .ok_or_else(|| CliResult::error(ExitCodes::INVALID_ARGS, "--port or --profile is required"))?;

        let replacement = match self.parity_replace {
            Some(c) => Some(u8::try_from(c).map_err(|_| {
                CliResult::error(ExitCodes::INVALID_ARGS, "parity replacement must be a single-byte character")
            })?),
            None => None,
        };

        let mut settings = LineSettings::new(port, self.baud)
            .data_bits(self.data_bits)
            .parity(self.parity.parse::<Parity>()?)
            .stop_bits(self.stop_bits.parse::<StopBits>()?)
            .flow_control(self.flow.parse::<FlowControlMode>()?)
            .manual_pins(self.rts, self.dtr)
            .parity_replacement(replacement);
        settings = if self.no_reopen {
            settings.no_auto_reopen()
        } else {
            settings.auto_reopen(Duration::from_millis(self.reopen_ms))
        };
        settings.validate()?;
        Ok((settings, SessionConfig::default()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli)?;

    let result = match &cli.command {
        Commands::ListPorts { detailed } => show_ports(&cli, *detailed),
        Commands::Connect {
            line,
            line_ending,
            hex_input,
            echo,
            timeout,
        } => connect(&cli, line, *line_ending, *hex_input, *echo, *timeout).await,
        Commands::Send {
            line,
            data,
            hex,
            line_ending,
            wait,
            expect_response,
        } => send_once(&cli, line, data, *hex, *line_ending, *wait, *expect_response),
        Commands::SaveProfile { name, line } => save_profile(&cli, name, line),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(())
        }
    };

    let result = CliResult::from_outcome(result);
    if let Some(msg) = result.message() {
        eprintln!("Error: {msg}");
    }
    Ok(result.to_exit_code())
}

/// Stderr logging plus an optional daily log file
fn init_tracing(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_dir = if cli.log { config::log_dir() } else { cli.log_dir.clone() };
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, "serline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn show_ports(cli: &Cli, detailed: bool) -> Result<(), CliResult> {
    let ports = list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&ports)
                .map_err(|e| CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string()))?;
            println!("{json}");
        }
        _ => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{}]", port.name, port.kind);
                }
            } else {
                for port in &ports {
                    println!("{}", port.name);
                }
            }
        }
    }

    Ok(())
}

async fn connect(
    cli: &Cli,
    line: &LineArgs,
    line_ending: LineEnding,
    hex_input: bool,
    echo: bool,
    timeout: Option<u64>,
) -> Result<(), CliResult> {
    let (settings, config) = line.resolve()?;
    let auto_reopen = settings.auto_reopen;
    if !cli.quiet {
        eprintln!("Connecting to {settings}...");
    }

    let session = Arc::new(Session::with_config(settings, config)?);
    let events = session.subscribe();
    if let Err(err) = session.start() {
        if !auto_reopen {
            return Err(err.into());
        }
        if !cli.quiet {
            eprintln!("{err}; waiting for the device...");
        }
    } else if !cli.quiet {
        eprintln!("Connected. Press Ctrl+C to exit.");
    }

    // Events are delivered on a crossbeam channel; drain it off the runtime.
    let printer = Arc::downgrade(&session);
    let format = cli.format;
    let quiet = cli.quiet;
    let bridge = tokio::task::spawn_blocking(move || loop {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(SerialEvent::DataReceived { .. }) => {
                if let Some(session) = printer.upgrade() {
                    output_data(format, &session.receive());
                }
            }
            Ok(SerialEvent::IoChanged { state }) if !quiet => eprintln!("[{state}]"),
            Ok(SerialEvent::IoError { kind, message }) => eprintln!("! {kind}: {message}"),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) if printer.strong_count() > 0 => {}
            Err(_) => break,
        }
    });

    let deadline = timeout.map(|t| Instant::now() + Duration::from_secs(t));
    let sleep_until = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(sleep_until);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let input = tokio::select! {
            input = lines.next_line() => input?,
            _ = tokio::signal::ctrl_c() => break,
            () = &mut sleep_until => break,
        };
        let Some(input) = input else { break };

        let payload = if hex_input {
            match hex::decode(input.replace(' ', "")) {
                Ok(bytes) => bytes,
                Err(e) => {
                    eprintln!("! invalid hex: {e}");
                    continue;
                }
            }
        } else {
            let mut bytes = input.trim_end().as_bytes().to_vec();
            bytes.extend_from_slice(line_ending.as_bytes());
            bytes
        };

        if echo && !cli.quiet {
            eprintln!("> {input}");
        }
        if let Err(err) = session.send(&payload) {
            tracing::debug!(error = %err, "Dropped input line");
            if !cli.quiet {
                eprintln!("! not sent: {err}");
            }
        }
    }

    session.stop();
    drop(session);
    let _ = bridge.await;

    if !cli.quiet {
        eprintln!("Disconnected.");
    }
    Ok(())
}

fn send_once(
    cli: &Cli,
    line: &LineArgs,
    data: &str,
    hex_payload: bool,
    line_ending: LineEnding,
    wait: u64,
    expect_response: bool,
) -> Result<(), CliResult> {
    let payload = if hex_payload {
        hex::decode(data.replace(' ', ""))
            .map_err(|e| CliResult::error(ExitCodes::INVALID_ARGS, format!("Invalid hex: {e}")))?
    } else {
        let mut bytes = data.as_bytes().to_vec();
        bytes.extend_from_slice(line_ending.as_bytes());
        bytes
    };

    let (settings, config) = line.resolve()?;
    let session = Session::with_config(settings.no_auto_reopen(), config)?;
    let events = session.subscribe();
    session.start()?;

    if !cli.quiet {
        eprintln!("Sending {} bytes...", payload.len());
    }
    session.send(&payload)?;

    let deadline = Instant::now() + Duration::from_millis(wait);
    let mut received = 0usize;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(SerialEvent::DataReceived { .. }) => {
                let data = session.receive();
                received += data.len();
                output_data(cli.format, &data);
            }
            Ok(SerialEvent::IoError { kind, message }) => {
                return Err(CliResult::error(ExitCodes::LINE_ERROR, format!("{kind}: {message}")));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    if received == 0 && expect_response {
        return Err(CliResult::timeout(format!("No response within {wait} ms")));
    }
    Ok(())
}

fn save_profile(cli: &Cli, name: &str, line: &LineArgs) -> Result<(), CliResult> {
    let (settings, session) = line.resolve()?;
    let path = config::profile_path(name)
        .ok_or_else(|| CliResult::error(ExitCodes::CONFIG_ERROR, "No config directory"))?;

    let mut profile = Profile::new(name, settings);
    profile.session = session;
    profile.save(&path)?;

    if !cli.quiet {
        println!("Saved profile '{name}' to {}", path.display());
    }
    Ok(())
}

fn output_data(format: OutputFormat, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    match format {
        OutputFormat::Hex => {
            println!("{}", hex::encode(data));
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "hex": hex::encode(data),
                    "ascii": String::from_utf8_lossy(data)
                })
            );
        }
        OutputFormat::Text => {
            let mut stdout = io::stdout();
            let _ = stdout.write_all(data);
            let _ = stdout.flush();
        }
    }
}
