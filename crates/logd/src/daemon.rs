//! Event loop of the daemon.
//!
//! A single task owns the [`Collector`] and multiplexes the user-space log
//! socket, the kernel log stream and process signals.

use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use logd_core::{Collector, LogError, LogRecord, LogSource};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tokio::net::UnixDatagram;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use crate::config::{DaemonConfig, Overrides, load};
use crate::error::{DaemonError, Result};

/// Largest datagram accepted on the log socket.
pub const MAX_DATAGRAM: usize = 1024;

type KernelLines = Split<BufReader<File>>;

/// The running daemon.
pub struct Daemon {
    config: DaemonConfig,
    config_path: Option<PathBuf>,
    overrides: Overrides,
    collector: Collector,
}

impl Daemon {
    /// Creates the collector for a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the collector cannot be created.
    pub fn new(
        config: DaemonConfig,
        config_path: Option<PathBuf>,
        overrides: Overrides,
    ) -> Result<Self> {
        let collector = Collector::new(&config.collector_config())?;
        Ok(Self {
            config,
            config_path,
            overrides,
            collector,
        })
    }

    /// Returns the collector.
    #[must_use]
    pub const fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Runs until SIGTERM or SIGINT, then shuts the collector down.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub async fn run(mut self) -> Result<()> {
        self.serve(std::future::pending()).await?;
        self.collector.shutdown();
        Ok(())
    }

    /// Serves both log sources until `shutdown` resolves or SIGTERM or
    /// SIGINT arrives.
    ///
    /// A log source that fails to open is reported and skipped; the other
    /// source is still served.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub async fn serve(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        tokio::pin!(shutdown);

        let socket_path = self.config.socket_path.clone();
        let socket = match bind_socket(&socket_path) {
            Ok(socket) => {
                info!(path = %socket_path.display(), "listening on log socket");
                Some(socket)
            }
            Err(e) => {
                error!(error = %e, "log socket unavailable");
                None
            }
        };

        let mut kernel = match open_kernel_log(&self.config.kmsg_path).await {
            Ok(lines) => {
                info!(path = %self.config.kmsg_path.display(), "reading kernel log");
                Some(lines)
            }
            Err(e) => {
                error!(error = %e, "kernel log unavailable");
                None
            }
        };

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                received = recv_datagram(socket.as_ref(), &mut buf) => match received {
                    Ok(len) => self.ingest(&mut buf[..len], LogSource::Syslog),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => warn!(error = %e, "log socket receive failed"),
                },
                line = next_kernel_line(kernel.as_mut()) => match line {
                    Ok(Some(mut line)) => self.ingest(&mut line, LogSource::Kernel),
                    Ok(None) => {
                        warn!("kernel log stream closed");
                        kernel = None;
                    }
                    Err(e) => {
                        warn!(error = %e, "kernel log read failed");
                        kernel = None;
                    }
                },
                _ = hangup.recv() => self.reload(),
                _ = terminate.recv() => {
                    info!("received SIGTERM");
                    break;
                }
                _ = interrupt.recv() => {
                    info!("received SIGINT");
                    break;
                }
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        if socket.is_some() {
            if let Err(e) = std::fs::remove_file(&socket_path) {
                debug!(error = %e, "failed to remove log socket");
            }
        }
        Ok(())
    }

    /// Feeds one raw line to the collector.
    pub fn ingest(&mut self, line: &mut [u8], source: LogSource) {
        ingest_line(&mut self.collector, line, source);
    }

    /// Re-reads the configuration and applies the store size and trace
    /// settings. The socket and kernel log paths are not re-opened.
    pub fn reload(&mut self) {
        info!("reloading configuration");
        let config = match load(self.config_path.as_deref(), &self.overrides) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "configuration reload failed, keeping current settings");
                return;
            }
        };

        if let Err(e) = self.collector.resize(config.log_size) {
            error!(error = %e, size = config.log_size, "failed to resize log store");
        }
        self.collector
            .apply_trace_config(&config.trace.rings, config.trace.enabled);
        self.config = config;
    }
}

/// Feeds one raw line to `collector`, returning the stored record.
///
/// Oversized lines are already reported by the collector; any other
/// failure is logged here.
pub fn ingest_line(
    collector: &mut Collector,
    line: &mut [u8],
    source: LogSource,
) -> Option<LogRecord> {
    match collector.insert(line, source) {
        Ok(record) => record,
        Err(LogError::RecordTooLarge { .. }) => None,
        Err(e) => {
            warn!(error = %e, source = source.as_str(), "failed to store line");
            None
        }
    }
}

/// Binds the log socket, replacing a stale socket file.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound.
pub fn bind_socket(path: &Path) -> Result<UnixDatagram> {
    let source_error = |error: io::Error| DaemonError::Source {
        source_name: "log socket",
        path: path.display().to_string(),
        error,
    };

    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale log socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(source_error(e)),
    }

    let socket = UnixDatagram::bind(path).map_err(source_error)?;
    std::fs::set_permissions(path, Permissions::from_mode(0o666)).map_err(source_error)?;
    Ok(socket)
}

/// Opens the kernel log as a stream of lines.
///
/// # Errors
///
/// Returns an error if the stream cannot be opened.
pub async fn open_kernel_log(path: &Path) -> Result<KernelLines> {
    let file = File::open(path).await.map_err(|error| DaemonError::Source {
        source_name: "kernel log",
        path: path.display().to_string(),
        error,
    })?;
    Ok(BufReader::new(file).split(b'\n'))
}

async fn recv_datagram(socket: Option<&UnixDatagram>, buf: &mut [u8]) -> io::Result<usize> {
    match socket {
        Some(socket) => socket.recv(buf).await,
        None => std::future::pending().await,
    }
}

async fn next_kernel_line(lines: Option<&mut KernelLines>) -> io::Result<Option<Vec<u8>>> {
    match lines {
        Some(lines) => lines.next_segment().await,
        None => std::future::pending().await,
    }
}
