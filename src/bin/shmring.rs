//! Shared-memory ping-pong benchmark.
//!
//! `shmring launch -m 64 -i 100000` starts a responder and an initiator from
//! this executable and waits for both; the responder prints the report.

use std::process::{Child, Command, ExitCode};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shmring::pingpong::{self, Config, Transport, DEFAULT_NAMESPACE};
use shmring::{Error, ErrorKind, Rendezvous, Role, DEFAULT_CAPACITY};

#[derive(Parser, Debug)]
#[command(name = "shmring")]
#[command(about = "Shared-memory ring ping-pong benchmark")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Spawn a responder and an initiator and wait for both.
    Launch {
        #[command(flatten)]
        run: RunArgs,
        /// Time the responder gets to arm itself before the initiator starts.
        #[arg(long, default_value_t = 500)]
        startup_delay_ms: u64,
    },
    /// Wait for the initiator, then time the round trips.
    Responder(RunArgs),
    /// Signal the responder, then echo its messages.
    Initiator(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Bytes per message.
    #[arg(short, long)]
    message_size: usize,
    /// Number of round trips.
    #[arg(short, long)]
    iterations: u64,
    /// Slots per ring, a power of two.
    #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,
    #[arg(short, long, value_enum, default_value_t = Transport::Ring)]
    transport: Transport,
    /// Prefix of the shared memory segment names.
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,
    /// Give up when the peer has not answered for this long.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl RunArgs {
    fn config(&self) -> Config {
        Config {
            message_size: self.message_size,
            iterations: self.iterations,
            capacity: self.capacity,
            spin_timeout: self.timeout_ms.map(Duration::from_millis),
            namespace: self.namespace.clone(),
            transport: self.transport,
        }
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            String::from("--message-size"),
            self.message_size.to_string(),
            String::from("--iterations"),
            self.iterations.to_string(),
            String::from("--capacity"),
            self.capacity.to_string(),
            String::from("--transport"),
            String::from(match self.transport {
                Transport::Ring => "ring",
                Transport::Sequenced => "sequenced",
            }),
            String::from("--namespace"),
            self.namespace.clone(),
        ];
        if let Some(timeout) = self.timeout_ms {
            args.push(String::from("--timeout-ms"));
            args.push(timeout.to_string());
        }
        args
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Launch {
            run,
            startup_delay_ms,
        } => launch(run, Duration::from_millis(*startup_delay_ms)),
        Commands::Responder(run) => peer(Role::Responder, run),
        Commands::Initiator(run) => peer(Role::Initiator, run),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "benchmark failed");
            ExitCode::FAILURE
        }
    }
}

fn peer(role: Role, run: &RunArgs) -> shmring::Result<()> {
    let config = run.config();
    tracing::info!(?role, ?config, "launching peer");
    if let Some(report) = pingpong::run_peer(role, &config)? {
        println!("{report}");
    }
    Ok(())
}

fn launch(run: &RunArgs, startup_delay: Duration) -> shmring::Result<()> {
    run.config().validate()?;
    // Both children signal the whole process group, this process included.
    let _rendezvous = Rendezvous::install(Role::Coordinator)?;

    let exe = std::env::current_exe()?;
    let mut responder = Command::new(&exe)
        .arg("responder")
        .args(run.to_args())
        .spawn()?;

    thread::sleep(startup_delay);

    let initiator = Command::new(&exe)
        .arg("initiator")
        .args(run.to_args())
        .spawn();
    let mut initiator = match initiator {
        Ok(child) => child,
        Err(err) => {
            // Without a peer the responder would spin forever.
            let _ = responder.kill();
            let _ = responder.wait();
            return Err(err.into());
        }
    };

    let responder_ok = wait(&mut responder, "responder")?;
    if !responder_ok {
        let _ = initiator.kill();
    }
    let initiator_ok = wait(&mut initiator, "initiator")?;
    if responder_ok && initiator_ok {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::PeerFailed))
    }
}

fn wait(child: &mut Child, what: &str) -> shmring::Result<bool> {
    let status = child.wait()?;
    if !status.success() {
        tracing::error!(peer = what, %status, "peer failed");
    }
    Ok(status.success())
}
