use std::sync::Arc;

use tokio::sync::watch;

/// Requests cancellation of a benchmark run.
///
/// The flag is sticky: once [ShutdownHandle::shutdown] has been called, every listener sees it,
/// including listeners created afterwards. This matters because the controller creates a new
/// listener for each phase and a signal may arrive between two phases.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::channel(false).0),
        }
    }

    pub fn shutdown(&self) {
        let was_shutdown = self.sender.send_replace(true);
        if was_shutdown {
            log::debug!("Shutdown already requested");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: watch::Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Point in time check if cancellation has been requested.
    pub fn should_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until cancellation is requested. Resolves immediately if it already was.
    ///
    /// If every [ShutdownHandle] has been dropped then nobody can request a shutdown any more and
    /// this never resolves, so it is safe to race against other work with `tokio::select!`.
    pub async fn wait_for_shutdown(&mut self) {
        if self.receiver.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Run cancelled by shutdown signal".to_string(),
        }
    }
}
