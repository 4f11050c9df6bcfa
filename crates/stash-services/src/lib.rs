//! stash-services — the index registry and service loop, and everything a
//! peer needs: content store, data channel, control client, workflows and
//! the event loop that ties them together.

pub mod adverts;
pub mod control;
pub mod index_server;
pub mod peer;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod transfer;

pub use adverts::{Advert, AdvertError, AdvertTable};
pub use control::{ControlError, IndexClient, Listing, Provider};
pub use index_server::IndexServer;
pub use peer::{detect_local_ip, Advertised, Departure, FetchReport, Peer, PeerError};
pub use registry::{Registry, RegistryEntry, RegistryError};
pub use runtime::{Command, Outcome, Request};
pub use store::ContentStore;
pub use transfer::{Fetched, Served, TransferError};
