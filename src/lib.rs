//! Stowaway - offline-first content cache and background synchronization engine
//!
//! Collaborators write progress, favorites, analytics events and profile
//! updates through [`Engine`]. Every write lands in the local object store
//! first and is queued for delivery; the synchronizer drains the queue
//! whenever the monitor reports the network as reachable. Network resources
//! are served through the cache strategy router, which falls back to cached
//! copies or placeholders while offline.

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod monitor;
pub mod queue;
pub mod router;
pub mod store;
pub mod sync;

pub use config::Config;
pub use engine::{Engine, EngineStatus, SweepReport};
pub use error::{Error, Result};
pub use events::EngineEvent;
pub use monitor::{Cadence, Visibility};
pub use router::{ResourceRequest, RouterResponse, Strategy};
