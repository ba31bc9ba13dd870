//! logd - syslog daemon for small systems
//!
//! Reads `/dev/log` and `/proc/kmsg` into a circular in-memory log store.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use logd::{Daemon, DaemonConfig, Overrides, config, daemon};
use logd_core::{Collector, LogSource};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "logd")]
#[command(about = "Syslog daemon with a circular in-memory log store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to config file
        #[arg(short, long, env = "LOGD_CONFIG")]
        config: Option<PathBuf>,

        /// Log store size in bytes
        #[arg(short = 'S', long)]
        size: Option<usize>,

        /// Path of the log socket
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Path of the kernel log
        #[arg(long)]
        kmsg: Option<PathBuf>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/logd.toml")]
        output: PathBuf,
    },

    /// Feed lines from stdin through the pipeline and print what is retained
    Dump {
        /// Only print the most recent N records (0 prints all)
        #[arg(short = 'n', long, default_value_t = 0)]
        count: usize,

        /// Log store size in bytes
        #[arg(short = 'S', long, default_value_t = logd_core::DEFAULT_CAPACITY)]
        size: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("logd=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            size,
            socket,
            kmsg,
        } => {
            let overrides = Overrides {
                log_size: size,
                socket_path: socket,
                kmsg_path: kmsg,
            };
            run_daemon(config, overrides)?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }

        Commands::Dump { count, size } => {
            dump(count, size)?;
        }
    }

    Ok(())
}

fn run_daemon(config_path: Option<PathBuf>, overrides: Overrides) -> anyhow::Result<()> {
    let config = config::load(config_path.as_deref(), &overrides)?;
    info!(
        log_size = config.log_size,
        socket = %config.socket_path.display(),
        kmsg = %config.kmsg_path.display(),
        "starting logd"
    );

    let daemon = Daemon::new(config, config_path, overrides)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(daemon.run())?;

    info!("logd stopped");
    Ok(())
}

fn init_config(output: &std::path::Path) -> anyhow::Result<()> {
    DaemonConfig::default().save(output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Start the daemon with:");
    println!("  logd run --config {}", output.display());

    Ok(())
}

fn dump(count: usize, size: usize) -> anyhow::Result<()> {
    let config = DaemonConfig {
        log_size: size,
        ..DaemonConfig::default()
    };
    config.validate()?;

    let mut collector = Collector::new(&config.collector_config())?;
    for line in std::io::stdin().lock().split(b'\n') {
        let mut line = line?;
        daemon::ingest_line(&mut collector, &mut line, LogSource::Syslog);
    }

    let mut out = std::io::stdout().lock();
    for record in collector.records(count) {
        writeln!(
            out,
            "{} {} <{}> {}",
            record.id,
            record.timestamp.to_rfc3339(),
            record.priority,
            record.message()
        )?;
    }

    collector.shutdown();
    Ok(())
}
