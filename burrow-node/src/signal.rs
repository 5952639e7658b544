//! Process signals: the first one starts a graceful stop, a second one exits
//! at once.

use std::io;

use burrow_core::shutdown::Shutdown;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}

/// Trigger `shutdown` on the first signal; exit with status 1 on the second.
pub fn install(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    let mut signals = Signals::new()?;
    Ok(tokio::spawn(async move {
        let name = signals.recv().await;
        // Keep the terminal tidy after ^C.
        println!();
        info!(signal = name, "received signal, shutting down");
        shutdown.trigger();

        let name = signals.recv().await;
        warn!(signal = name, "received another signal before graceful shutdown, terminating");
        std::process::exit(1);
    }))
}
