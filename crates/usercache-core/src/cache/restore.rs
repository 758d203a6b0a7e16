use std::sync::Arc;

use tokio::sync::watch;

/// True from startup until the persisted snapshot has been loaded.
/// Clone is cheap.
#[derive(Clone)]
pub struct RestoreGate {
    restoring: Arc<watch::Sender<bool>>,
}

impl RestoreGate {
    pub fn new() -> Self {
        let (restoring, _) = watch::channel(true);
        Self {
            restoring: Arc::new(restoring),
        }
    }

    pub fn is_restoring(&self) -> bool {
        *self.restoring.borrow()
    }

    pub fn finish(&self) {
        self.restoring.send_replace(false);
    }

    /// Resolve once restoration has finished.
    pub async fn wait(&self) {
        let mut rx = self.restoring.subscribe();
        // The sender lives in `self`, so this cannot fail while we hold it
        let _ = rx.wait_for(|restoring| !*restoring).await;
    }
}

impl Default for RestoreGate {
    fn default() -> Self {
        Self::new()
    }
}
