//! Observer-facing delivery: typed topics, membership and fan-out.
//!
//! ```text
//! SessionActor ──dispatch(Event)──► BroadcastRouter ──topics_for()──► [Topic]
//!                                         │
//!                                         ├── SubscriptionManager::recipients([Topic])  (dedup by observer)
//!                                         │        └─► outbox.send()  per observer, never blocks
//!                                         └── Bus::publish()          (internal consumers)
//! ```

mod observer;
mod router;
mod subscriptions;
mod topic;

pub use observer::ObserverStream;
pub use router::{BroadcastRouter, topics_for};
pub use subscriptions::SubscriptionManager;
pub use topic::{Role, Topic};
