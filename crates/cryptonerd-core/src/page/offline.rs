//! Behavior of the offline fallback page once it is on screen.

use tokio::sync::watch;
use tracing::info;

use super::connectivity::Connectivity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    /// Navigate the page to `target`.
    Reload { target: String },
}

pub struct OfflinePage {
    connectivity: watch::Receiver<Connectivity>,
    home: String,
}

impl OfflinePage {
    pub fn new(connectivity: watch::Receiver<Connectivity>) -> Self {
        Self {
            connectivity,
            home: "/".to_string(),
        }
    }

    /// The "Retry" button: reload the root path regardless of connectivity.
    pub fn retry(&self) -> PageAction {
        PageAction::Reload {
            target: self.home.clone(),
        }
    }

    /// Wait for the next transition to online and reload the root path.
    ///
    /// Only a transition counts; being online already when the page is shown
    /// does not trigger a reload. Returns `None` if the monitor went away.
    pub async fn wait_for_reconnect(&mut self) -> Option<PageAction> {
        self.connectivity.borrow_and_update();
        loop {
            self.connectivity.changed().await.ok()?;
            if *self.connectivity.borrow_and_update() == Connectivity::Online {
                info!(home = %self.home, "Back online, reloading");
                return Some(self.retry());
            }
        }
    }
}
