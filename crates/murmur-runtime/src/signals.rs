/// Waits for a process termination signal.
///
/// On Unix this is SIGINT or SIGTERM; elsewhere only Ctrl-C. Each call
/// registers fresh listeners, so a second signal arriving while shutdown is
/// already underway is simply not observed again by the supervisor.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
