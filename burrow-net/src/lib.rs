//! libp2p overlay for burrow.
//!
//! Kademlia provider records carry the service tag rendezvous, identify and
//! optional mDNS feed peer addresses, and libp2p-stream carries the
//! protocol-tagged streams the endpoint router and proxy dispatcher use.

pub mod behaviour;
pub mod config;
pub mod discovery;
pub mod error;
pub mod listener;
pub mod node;
pub mod protocol;

pub use config::OverlayConfig;
pub use error::NetError;
pub use node::{OverlayHandle, OverlayNode};
