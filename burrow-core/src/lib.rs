//! Routing and dispatch core for burrow.
//!
//! An endpoint accepts client connections on local listeners and forwards
//! each one over an overlay stream to a proxy peer chosen by a balancer. A
//! proxy serves those streams with protocol services. The overlay itself is
//! consumed through the [`transport::Transport`] and [`transport::Discovery`]
//! capabilities.

pub mod balancer;
pub mod candidates;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod shutdown;
pub mod transport;

pub use error::{CoreError, MultiError};
pub use protocol::{BoxConn, Listener, ProtocolId, Service, ServiceConfig};
