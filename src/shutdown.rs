use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on the first SIGTERM or SIGINT, and call
/// `on_force` on the second.
///
/// A cancelled token aborts the orchestrator's current wait; workers are
/// still cleaned up before the process exits. The second signal is the
/// operator's way out of a cleanup that hangs.
pub fn install_interrupt_handler<F>(on_force: F) -> std::io::Result<CancellationToken>
where
    F: FnOnce() + Send + 'static,
{
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigint.recv() => "SIGINT",
                else => break,
            };
            if tx.send(name).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(escalate(rx, token.clone(), on_force));

    Ok(token)
}

async fn escalate<F>(
    mut signals: mpsc::Receiver<&'static str>,
    token: CancellationToken,
    on_force: F,
) where
    F: FnOnce(),
{
    let Some(first) = signals.recv().await else {
        return;
    };
    tracing::warn!(
        signal = first,
        "Aborting run and stopping workers; signal again to exit immediately"
    );
    token.cancel();

    if let Some(second) = signals.recv().await {
        tracing::error!(signal = second, "Second signal, exiting without finishing cleanup");
        on_force();
    }
}
