use ft_bench_core::prelude::ShutdownHandle;
use tokio::signal;

/// Trigger the returned handle on Ctrl-C or, on unix, `SIGTERM`.
pub(crate) fn start_shutdown_listener(
    runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<ShutdownHandle> {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = wait_for_signal().await {
            log::error!("Failed to listen for shutdown signals: {e:?}");
            return;
        }
        log::warn!("Received shutdown signal, stopping the benchmark...");
        listener_handle.shutdown();
    });

    Ok(handle)
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}
