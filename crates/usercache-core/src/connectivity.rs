//! Process-wide online/offline state.
//!
//! `Connectivity` is consulted by the fetch coordinator and the mutation
//! executor but owned by whoever feeds it signals: the probing
//! `spawn_monitor` task in the binary, or tests calling `set_online`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::ApiClient;

/// Shared connectivity flag. Clone is cheap.
#[derive(Clone)]
pub struct Connectivity {
    online: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        Self {
            online: Arc::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Update the flag. Subscribers are woken only on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                info!("Connectivity restored");
            } else {
                info!("Connectivity lost, serving cached data");
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Environment signal that reports whether the network is reachable.
pub trait ConnectivitySource: Send + Sync + 'static {
    fn probe(&self) -> BoxFuture<'static, bool>;
}

impl ConnectivitySource for ApiClient {
    fn probe(&self) -> BoxFuture<'static, bool> {
        let api = self.clone();
        Box::pin(async move { api.probe().await })
    }
}

/// Poll `source` every `interval` and feed the result into `connectivity`.
///
/// The task runs until aborted; dropping the handle does not stop it.
pub fn spawn_monitor<S: ConnectivitySource>(
    source: S,
    connectivity: Connectivity,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let online = source.probe().await;
            debug!(online, "Connectivity probe");
            connectivity.set_online(online);
            tokio::time::sleep(interval).await;
        }
    })
}
