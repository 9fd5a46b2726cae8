//! Control connection to the station.

pub mod connection;
pub mod keepalive;

pub use connection::{ChannelEvent, ControlChannel};
pub use keepalive::{KeepAliveMonitor, KEEPALIVE_INTERVAL};
