/// Injected online/offline signal.
///
/// Components hold an `Arc<dyn ConnectivityMonitor>` and either ask
/// `is_online()` at decision points or `watch()` for transitions.
use tokio::sync::watch;

pub trait ConnectivityMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline transition.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Connectivity flipped by hand: by the embedding app from platform events,
/// or by tests.
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Publish a new state. Re-publishing the current state is not a
    /// transition and wakes nobody.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            log::info!(
                "[lexera.connectivity] Now {}",
                if online { "online" } else { "offline" }
            );
        }
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_observed() {
        let connectivity = ManualConnectivity::new(false);
        let mut rx = connectivity.watch();
        assert!(!connectivity.is_online());

        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[test]
    fn test_same_state_is_not_a_transition() {
        let connectivity = ManualConnectivity::new(true);
        let rx = connectivity.watch();
        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
