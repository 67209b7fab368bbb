//! OS signal handling for the `uwv-run` binary.
//!
//! A dedicated `signal-handler` thread drives a small current-thread tokio
//! runtime and raises the orchestrator's stop flag once a termination
//! signal arrives. `run` then returns `Completion::Stopped` and the normal
//! teardown path flushes recorders and stops components in reverse order.
//!
//! On Unix SIGINT, SIGTERM and SIGQUIT are handled; elsewhere only Ctrl-C.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Completes when the process receives a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Raise `stop` on the first termination signal.
pub fn install_stop_handler(stop: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    spawn_stop_watcher(stop, wait_for_shutdown_signal())
}

/// Raise `stop` once `signal` resolves. A failing watcher leaves the flag
/// alone and logs why.
pub fn spawn_stop_watcher<F>(stop: Arc<AtomicBool>, signal: F) -> io::Result<JoinHandle<()>>
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("signal-handler".into())
        .spawn(move || match runtime.block_on(signal) {
            Ok(()) => {
                tracing::info!("Shutdown signal received, stopping run");
                stop.store(true, Ordering::Release);
            }
            Err(e) => tracing::warn!("Signal handling unavailable: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_raises_stop_flag() {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_stop_watcher(stop.clone(), async { Ok(()) }).unwrap();
        handle.join().unwrap();
        assert!(stop.load(Ordering::Acquire));
    }

    #[test]
    fn test_failed_watcher_leaves_flag_alone() {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_stop_watcher(stop.clone(), async {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no signals here"))
        })
        .unwrap();
        handle.join().unwrap();
        assert!(!stop.load(Ordering::Acquire));
    }
}
