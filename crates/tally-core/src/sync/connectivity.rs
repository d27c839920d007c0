//! Online/offline signal shared between the host app and the orchestrator

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable handle over the device's connectivity state.
///
/// The host application flips it from its platform network observer; the
/// orchestrator reads it to gate retries instead of polling the network.
#[derive(Clone, Debug)]
pub struct Connectivity {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Report a connectivity change; repeated values are ignored
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Resolve once the device is online (immediately if it already is)
    pub async fn wait_online(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(|online| *online).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Resolve on the next transition to online, ignoring the current value
    pub(crate) async fn reconnected(&self) {
        let mut receiver = self.sender.subscribe();
        loop {
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
            if *receiver.borrow_and_update() {
                return;
            }
        }
    }
}
