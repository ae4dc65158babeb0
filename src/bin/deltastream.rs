//! Deltastream CLI - streaming delta transfer of one file over TCP.

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deltastream::net::{self, NetConfig, DEFAULT_PORT};
use deltastream::{
    patched_path, Session, SessionBuilder, StreamError, MAX_FRAME_LEN, PATCHED_SUFFIX,
};

/// Deltastream - send only what changed
#[derive(Parser)]
#[command(name = "deltastream")]
#[command(version)]
#[command(about = "Streaming delta transfer of one file over a framed TCP connection")]
#[command(long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct Tuning {
    /// Window capacity in bytes (1-32767)
    #[arg(long, default_value_t = MAX_FRAME_LEN)]
    capacity: usize,

    /// Block length override (64-65536)
    #[arg(long)]
    block_len: Option<u32>,

    /// Strong hash length override (4-32)
    #[arg(long)]
    strong_len: Option<u32>,

    /// Socket read/write timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept one connection and send the delta of FILE against the peer's copy
    Serve {
        /// File holding the new version
        #[arg(required = true)]
        file: PathBuf,

        /// Address to bind
        #[arg(long, env = "DELTASTREAM_HOST", default_value = "0.0.0.0")]
        bind: String,

        /// Port to listen on
        #[arg(short, long, env = "DELTASTREAM_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Connect to a server and patch FILE into FILE<suffix>
    Fetch {
        /// File holding the old version
        #[arg(required = true)]
        file: PathBuf,

        /// Server host
        #[arg(long, env = "DELTASTREAM_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(short, long, env = "DELTASTREAM_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Suffix appended to FILE for the patched output
        #[arg(long, default_value = PATCHED_SUFFIX)]
        suffix: String,

        /// Skip checksum verification of the patched file
        #[arg(long)]
        no_verify: bool,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Generate a signature file for a basis
    Signature {
        /// Basis file (old version)
        #[arg(required = true)]
        basis: PathBuf,

        /// Output signature file (default: <basis>.sig)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Compute a delta file from a signature and a new file
    Delta {
        /// Signature file (of old version)
        #[arg(required = true)]
        signature: PathBuf,

        /// New file
        #[arg(required = true)]
        file: PathBuf,

        /// Output delta file (default: <file>.delta)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Apply a delta file to a basis
    Patch {
        /// Basis file (old version)
        #[arg(required = true)]
        basis: PathBuf,

        /// Delta file
        #[arg(required = true)]
        delta: PathBuf,

        /// Output file (default: <basis>.new)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip checksum verification
        #[arg(long)]
        no_verify: bool,

        #[command(flatten)]
        tuning: Tuning,
    },
}

/// A failed step and its cause.
struct Failure {
    step: &'static str,
    source: StreamError,
}

trait Step<T> {
    fn step(self, step: &'static str) -> Result<T, Failure>;
}

impl<T> Step<T> for deltastream::Result<T> {
    fn step(self, step: &'static str) -> Result<T, Failure> {
        self.map_err(|source| Failure { step, source })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure { step, source }) => {
            eprintln!("Error: {step}: {source}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(command: Commands) -> Result<(), Failure> {
    match command {
        Commands::Serve {
            file,
            bind,
            port,
            tuning,
        } => run_serve(&file, &bind, port, tuning),
        Commands::Fetch {
            file,
            host,
            port,
            suffix,
            no_verify,
            tuning,
        } => run_fetch(&file, &host, port, &suffix, !no_verify, tuning),
        Commands::Signature {
            basis,
            output,
            tuning,
        } => {
            let output = output.unwrap_or_else(|| with_extension(&basis, "sig"));
            let stats = session(tuning, true)?
                .signature_file(&basis, &output)
                .step("generate signature")?;
            println!(
                "Generated signature: {} ({} bytes)",
                output.display(),
                stats.bytes_out
            );
            Ok(())
        }
        Commands::Delta {
            signature,
            file,
            output,
            tuning,
        } => {
            let output = output.unwrap_or_else(|| with_extension(&file, "delta"));
            let stats = session(tuning, true)?
                .delta_file(&signature, &file, &output)
                .step("compute delta")?;
            println!(
                "Generated delta: {} ({} copied, {} literal, {:.1}% reused)",
                output.display(),
                stats.bytes_copied,
                stats.bytes_literal,
                stats.ratio() * 100.0
            );
            Ok(())
        }
        Commands::Patch {
            basis,
            delta,
            output,
            no_verify,
            tuning,
        } => {
            let output = output.unwrap_or_else(|| patched_path(&basis, PATCHED_SUFFIX));
            let written = session(tuning, !no_verify)?
                .patch_file(&basis, &delta, &output)
                .step("apply patch")?;
            println!("Patched: {} ({written} bytes)", output.display());
            Ok(())
        }
    }
}

fn run_serve(file: &Path, bind: &str, port: u16, tuning: Tuning) -> Result<(), Failure> {
    let session = session(tuning, true)?;
    let config = net_config(tuning);

    if !file.is_file() {
        return Err(Failure {
            step: "open file",
            source: StreamError::Argument(format!("{} is not a file", file.display())),
        });
    }

    let listener = net::bind((bind, port)).step("bind")?;
    println!("Listening on {bind}:{port}");
    let (stream, peer) = net::accept_one(listener, &config).step("accept")?;
    println!("Connection from {peer}");

    let table = session.receive_signature(&stream).step("receive signature")?;
    println!(
        "Received signature: {} blocks of {} bytes",
        table.block_count(),
        table.block_len()
    );

    let stats = session.send_delta(file, &table, &stream).step("send delta")?;
    println!(
        "Sent delta: {} copied, {} literal, {:.1}% reused",
        stats.bytes_copied,
        stats.bytes_literal,
        stats.ratio() * 100.0
    );
    Ok(())
}

fn run_fetch(
    file: &Path,
    host: &str,
    port: u16,
    suffix: &str,
    verify: bool,
    tuning: Tuning,
) -> Result<(), Failure> {
    let session = session(tuning, verify)?;
    let config = net_config(tuning);
    let output = patched_path(file, suffix);

    if !file.is_file() {
        return Err(Failure {
            step: "open file",
            source: StreamError::Argument(format!("{} is not a file", file.display())),
        });
    }

    let stream: TcpStream = net::connect((host, port), &config).step("connect")?;

    let stats = session.send_signature(file, &stream).step("send signature")?;
    println!("Sent signature: {} bytes", stats.bytes_out);

    let written = session
        .receive_patch(&stream, file, &output)
        .step("receive delta")?;
    println!("Patched: {} ({written} bytes)", output.display());
    Ok(())
}

fn session(tuning: Tuning, verify: bool) -> Result<Session, Failure> {
    let mut builder = SessionBuilder::new()
        .capacity(tuning.capacity)
        .verify_checksum(verify);
    if let Some(len) = tuning.block_len {
        builder = builder.block_len(len);
    }
    if let Some(len) = tuning.strong_len {
        builder = builder.strong_len(len);
    }
    builder.build().step("configure")
}

fn net_config(tuning: Tuning) -> NetConfig {
    NetConfig {
        io_timeout: tuning.timeout.map(Duration::from_secs),
        ..NetConfig::default()
    }
}

fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut p = path.to_path_buf();
    p.set_extension(ext);
    p
}
