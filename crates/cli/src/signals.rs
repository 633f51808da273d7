use exifcraft_core::metadata::MetadataStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Exit status used when a second interrupt forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Listens for Ctrl-C and SIGTERM for the whole run.
///
/// The first signal sets `flag`, so the batch finishes the file in flight and
/// stops before the next one. A second signal shuts the metadata worker down
/// and exits the process immediately.
pub fn spawn_cancel_listener(
    flag: Arc<AtomicBool>,
    metadata: Arc<dyn MetadataStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (tx, rx) = mpsc::channel(4);
        let forced = tokio::select! {
            _ = forward_signals(tx) => false,
            forced = handle_interrupts(flag, metadata, rx) => forced,
        };
        if forced {
            std::process::exit(FORCED_EXIT_CODE);
        }
    })
}

/// Reacts to interrupts arriving on `rx`. Returns `true` once a second
/// interrupt has shut `metadata` down, `false` if the channel closes first.
pub async fn handle_interrupts(
    flag: Arc<AtomicBool>,
    metadata: Arc<dyn MetadataStore>,
    mut rx: mpsc::Receiver<()>,
) -> bool {
    if rx.recv().await.is_none() {
        return false;
    }
    warn!("interrupt received, finishing the current file before stopping (press Ctrl-C again to exit now)");
    flag.store(true, Ordering::SeqCst);

    if rx.recv().await.is_none() {
        return false;
    }
    warn!("second interrupt received, exiting now");
    if let Err(e) = metadata.shutdown().await {
        warn!(error = %e, "exiftool shutdown failed");
    }
    true
}

async fn forward_signals(tx: mpsc::Sender<()>) {
    let mut signals = Interrupts::new();
    loop {
        signals.recv().await;
        if tx.send(()).await.is_err() {
            return;
        }
    }
}

/// Keeps the SIGTERM stream registered across waits so no signal is lost
/// between two `recv` calls.
struct Interrupts {
    #[cfg(unix)]
    term: Option<tokio::signal::unix::Signal>,
}

impl Interrupts {
    #[cfg(unix)]
    fn new() -> Self {
        use tokio::signal::unix::{signal, SignalKind};
        let term = match signal(SignalKind::terminate()) {
            Ok(term) => Some(term),
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM, only Ctrl-C cancels");
                None
            }
        };
        Self { term }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        Self {}
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        match self.term.as_mut() {
            Some(term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}
