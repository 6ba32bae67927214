use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use nulrpc_client::ClientOptions;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod request;
pub mod serve;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one request and print the response.
    Request(RequestArgs),
    /// Print server-pushed events.
    Watch(WatchArgs),
    /// Run a minimal peer for local testing.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Request(args) => request::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Connection options shared by the client commands.
#[derive(Args, Debug, Default)]
pub struct ClientArgs {
    /// JSON options file (camelCase keys, durations in ms). Flags override it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Reconnect after the connection drops.
    #[arg(long)]
    pub reconnect: bool,
    /// Reconnect attempts per outage; negative means unbounded.
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub max_retries: Option<i64>,
    /// Delay before each reconnect attempt (e.g. 8s, 500ms).
    #[arg(long, value_name = "DUR")]
    pub reconnect_delay: Option<String>,
    /// Time allowed for each connect attempt (e.g. 8s, 500ms).
    #[arg(long, value_name = "DUR")]
    pub connect_timeout: Option<String>,
    /// Reconnect when no heartbeat arrives within the check interval.
    #[arg(long)]
    pub heartbeat_check: bool,
    /// Heartbeat check interval (e.g. 8s).
    #[arg(long, value_name = "DUR")]
    pub heartbeat_interval: Option<String>,
    /// Do not log individual heartbeats.
    #[arg(long)]
    pub no_heartbeat_logs: bool,
}

impl ClientArgs {
    pub fn options(&self) -> CliResult<ClientOptions> {
        let mut options = match &self.config {
            Some(path) => load_options(path)?,
            None => ClientOptions::default(),
        };
        if self.reconnect {
            options.reconnect = true;
        }
        if let Some(retries) = self.max_retries {
            options.reconnect_max_retries = retries;
        }
        if let Some(delay) = &self.reconnect_delay {
            options.reconnect_timeout = parse_duration(delay)?;
        }
        if let Some(timeout) = &self.connect_timeout {
            options.connect_timeout = parse_duration(timeout)?;
        }
        if self.heartbeat_check {
            options.heartbeat_check = true;
        }
        if let Some(interval) = &self.heartbeat_interval {
            options.heartbeat_check_interval = parse_duration(interval)?;
        }
        if self.no_heartbeat_logs {
            options.no_heartbeat_logs = true;
        }
        Ok(options)
    }
}

fn load_options(path: &Path) -> CliResult<ClientOptions> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    ClientOptions::from_json(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid options in {}: {err}", path.display()),
        )
    })
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Server address (host:port).
    pub addr: String,
    /// Server operation to call.
    pub endpoint: String,
    /// Request id. Default: random UUID.
    #[arg(long)]
    pub id: Option<String>,
    /// Arguments; JSON is sent as-is, other text as a JSON string.
    #[arg(long)]
    pub args: Option<String>,
    /// Time to wait for the response (e.g. 2s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    #[command(flatten)]
    pub client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Server address (host:port).
    pub addr: String,
    /// Exit after receiving N events.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (host:port; port 0 picks a free one).
    pub addr: String,
    /// Heartbeat interval (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub heartbeat: String,
    /// Also push a `tick` event at this interval.
    #[arg(long, value_name = "DUR")]
    pub events: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn parse_addr(input: &str) -> CliResult<(String, u16)> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| CliError::new(USAGE, format!("address must be host:port: {input}")))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(CliError::new(USAGE, format!("address has no host: {input}")));
    }
    let port = port
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid port in address: {input}")))?;
    Ok((host.to_string(), port))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Runtime for the async client and server paths.
pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))
}
