//! Server reactor.
//!
//! A single tokio task owns the dispatcher and alternates between receiving
//! datagrams and polling timers. Each datagram and each timer pass runs to
//! completion before the next one starts, so operations on the same key
//! never interleave.

use crate::core::config::Config;
use crate::core::time::{Clock, SystemClock};
use crate::lease::timer::TimerScheduler;
use crate::server::dispatcher::{DispatcherSettings, RequestDispatcher};
use crate::server::transport::UdpTransport;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Requests a running reactor to stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.tx.send(true);
    }
}

/// Cache server runtime.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Bound UDP socket, shared with the transport.
    socket: Arc<UdpSocket>,

    /// Request dispatcher, driven only from `run`.
    dispatcher: RequestDispatcher<UdpTransport>,

    /// Whether the reactor loop is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: Arc<watch::Sender<bool>>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Bind the UDP socket and build the dispatcher on the wall clock.
    pub async fn bind(config: Config) -> Result<Self> {
        Self::bind_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Bind with an explicit clock.
    pub async fn bind_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let bind_addr = config.bind_addr()?;
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind UDP socket on {}", bind_addr))?;
        let socket = Arc::new(socket);

        let timers = Arc::new(TimerScheduler::new(clock));
        let mut dispatcher = RequestDispatcher::new(
            UdpTransport::new(Arc::clone(&socket)),
            timers,
            DispatcherSettings::from(&config),
        );
        dispatcher
            .seed(&config.seeds)
            .context("failed to seed the cache store")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!(
            bind = %socket.local_addr().context("failed to read local address")?,
            lease_ms = config.lease.duration_ms,
            ack_timeout_ms = config.delivery.ack_timeout_ms,
            "cache server bound"
        );

        Ok(Self {
            config: Arc::new(config),
            socket,
            dispatcher,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("failed to read local address")
    }

    /// Handle that stops `run` from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Check if the reactor loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn dispatcher(&self) -> &RequestDispatcher<UdpTransport> {
        &self.dispatcher
    }

    /// Run the reactor until Ctrl-C or the shutdown handle fires.
    pub async fn run(&mut self) -> Result<()> {
        let socket = Arc::clone(&self.socket);
        let mut buf = vec![0u8; self.config.server.max_datagram_bytes];
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.timer.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown_rx = self.shutdown_rx.clone();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        self.running.store(true, Ordering::Release);
        tracing::info!("cache server running");

        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("shutdown requested by handle");
                break;
            }

            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            if let Err(e) = self.dispatcher.on_receive(peer, &buf[..len]) {
                                tracing::error!(peer = %peer, error = %e, "request processing failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.dispatcher.poll_timers();
                }
                _ = &mut ctrl_c => {
                    tracing::warn!("shutdown signal received (SIGINT)");
                    break;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        let store = self.dispatcher.store_stats();
        let delivery = self.dispatcher.delivery_stats();
        tracing::info!(
            entries = store.entries,
            pending_responses = delivery.pending,
            retransmitted = delivery.retransmitted,
            "cache server stopped"
        );
        Ok(())
    }
}
