//! The page side of the worker protocol: favorites, refresh scheduling,
//! connectivity tracking and the offline fallback page.

pub mod connectivity;
pub mod favorites;
pub mod offline;
pub mod refresh;

pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use favorites::FavoritesStore;
pub use offline::{OfflinePage, PageAction};
pub use refresh::{PageClient, RefreshKind, RefreshSchedule, Refresher};
