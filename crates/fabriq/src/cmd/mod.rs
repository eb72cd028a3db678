use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;

pub mod keygen;
pub mod run;
pub mod send;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a worker node.
    Run(RunArgs),
    /// Generate an identity file and print its public key.
    Keygen(KeygenArgs),
    /// Send a single request to a worker.
    Send(SendArgs),
    /// Subscribe to a worker's heartbeat beacons.
    Watch(WatchArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args),
        Command::Keygen(args) => keygen::run(args),
        Command::Send(args) => send::run(args),
        Command::Watch(args) => watch::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Address for the service endpoint.
    #[arg(long, default_value = "127.0.0.1:9091")]
    pub service: SocketAddr,
    /// Address for the heartbeat endpoint.
    #[arg(long, default_value = "127.0.0.1:9092")]
    pub heartbeat: SocketAddr,
    /// Worker display name.
    #[arg(long, default_value = "fabriq-worker")]
    pub name: String,
    /// Identity file path.
    #[arg(long, value_name = "FILE")]
    pub identity: PathBuf,
    /// Peer address permitted to connect (repeatable). No rules admits
    /// any address.
    #[arg(long = "allow", value_name = "IP")]
    pub allow: Vec<String>,
    /// Authorized client public key, hex (repeatable). No keys admits
    /// any client identity.
    #[arg(long = "authorized-key", value_name = "HEX")]
    pub authorized_keys: Vec<String>,
    /// Log each dispatched request.
    #[arg(long)]
    pub log_requests: bool,
    /// Attach a demo "echo" handler that mirrors requests back.
    #[arg(long)]
    pub echo: bool,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Where to write the identity file.
    #[arg(long, value_name = "FILE")]
    pub out: PathBuf,
    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Worker service address.
    pub addr: SocketAddr,
    /// Command name.
    #[arg(long, short = 'c')]
    pub command: String,
    /// Payload frame (repeatable, sent in order).
    #[arg(long = "data", value_name = "STRING")]
    pub data: Vec<String>,
    /// Identity file; a throwaway identity is generated when omitted.
    #[arg(long, value_name = "FILE")]
    pub identity: Option<PathBuf>,
    /// Expected worker public key, hex; the connection aborts on
    /// mismatch.
    #[arg(long, value_name = "HEX")]
    pub server_key: Option<String>,
    /// Wait for one reply envelope and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s,
    /// 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Worker heartbeat address.
    pub addr: SocketAddr,
    /// Exit after printing N beacons.
    #[arg(long)]
    pub count: Option<usize>,
}
