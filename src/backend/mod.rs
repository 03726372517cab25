//! Backend contract and adapters.
//!
//! Every mail protocol implements [`Backend`]. Two adapters ship with the
//! engine:
//!
//! - [`DemoBackend`] serves a static fixture, used for demo accounts
//! - [`RemoteBackend`] drives a live server through a [`RemoteStore`]
//!
//! [`BackendManager`] hands out one cached backend per account.

mod capabilities;
mod config;
mod demo;
pub(crate) mod listener;
mod manager;
mod remote;
mod traits;

pub use capabilities::{Capabilities, Capability, CapabilitySet, Support};
pub use config::{ExpungePolicy, SyncConfig};
pub use demo::{
    DemoBackend, DemoContents, DemoFolder, FixtureDirLoader, MessageLoader, DEMO_DELIMITER,
};
pub use listener::{SyncListener, SyncSession, SyncState, SYNC_ABORTED};
pub use manager::{BackendFactory, BackendManager, DemoBackendFactory};
pub use remote::{FetchPart, FetchedMessage, RemoteBackend, RemoteStore};
pub use traits::{Backend, BackendError, BackendPusher, BackendPusherCallback, Result};
