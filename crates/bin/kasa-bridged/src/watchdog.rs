//! systemd service notifications: readiness, watchdog keep-alives and stop.
//!
//! Messages are single datagrams sent to the socket named by
//! `NOTIFY_SOCKET`, which systemd sets for `Type=notify` services.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::UnixDatagram;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

pub struct Notifier {
    socket: UnixDatagram,
    path: PathBuf,
}

impl Notifier {
    /// Notifier for the socket in `NOTIFY_SOCKET`, `None` when unset.
    ///
    /// # Errors
    ///
    /// Fails for abstract socket names and when no datagram socket can be
    /// created.
    pub fn from_env() -> io::Result<Option<Self>> {
        Self::from_var(std::env::var_os("NOTIFY_SOCKET"))
    }

    fn from_var(value: Option<OsString>) -> io::Result<Option<Self>> {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        if value.as_encoded_bytes().first() == Some(&b'@') {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "abstract notify sockets are not supported",
            ));
        }
        Ok(Some(Self {
            socket: UnixDatagram::unbound()?,
            path: PathBuf::from(value),
        }))
    }

    async fn notify(&self, state: &str) {
        if let Err(err) = self.socket.send_to(state.as_bytes(), &self.path).await {
            tracing::warn!(state, error = %err, "failed to notify systemd");
        }
    }

    /// Report readiness, then keep the watchdog fed every `interval` until
    /// `shutdown` flips to `true`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        self.notify("READY=1").await;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.notify("WATCHDOG=1").await,
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        self.notify("STOPPING=1").await;
    }
}
