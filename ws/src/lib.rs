//! Multiplexed WebSocket connections: named registry, shared message log,
//! liveness probing and supervised reconnection.

pub mod config;
pub mod error;
pub mod log;
pub mod manager;
pub mod prober;
pub mod registry;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[cfg(test)]
mod manager_tests;

pub use config::{ManagerConfig, ProbeConfig, ReconnectPolicy};
pub use error::{TransportError, WsError};
pub use manager::{ConnectionManager, ManagerEvent};
pub use registry::ConnectionPatch;
pub use transport::{Connector, Frame, TungsteniteConnector};
