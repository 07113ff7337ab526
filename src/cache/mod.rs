pub mod config;
pub mod coordinator;
pub mod entry;
pub mod events;
pub mod key;
pub mod mutation;
pub mod pages;
pub mod store;
pub mod subscription;

pub use config::{QueryOptions, RetryPolicy};
pub use coordinator::{FetchCoordinator, QueryFetch, SubscriptionHandle, fetch_fn};
pub use entry::{FetchStatus, QueryEntry, QuerySnapshot, QueryStatus};
pub use events::{EventBridge, EventBridgeHandle, LifecycleEvent};
pub use key::{KeySegment, QueryKey};
pub use mutation::MutationExecutor;
pub use pages::{NextPageParam, PageFetch, PagedData, PagedQuery, page_fn};
pub use store::{CacheStats, QueryStore};
pub use subscription::{SubscriptionCallback, SubscriptionManager};
