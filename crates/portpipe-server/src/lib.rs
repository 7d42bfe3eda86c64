//! Tunnel endpoint logic
//!
//! - [`StreamForwarder`]: handshake, dial and bidirectional copy for each
//!   stream the peer opens
//! - [`PortWatcher`]: polls the kernel's listening-socket tables and emits an
//!   event for every port that starts listening
//! - [`PortNotifier`]: tells the peer about those ports on fresh streams
//! - [`Coordinator`]: the event loop tying them to the session

pub mod connection;
pub mod coordinator;
pub mod forwarder;
pub mod notifier;
pub mod port_watcher;
pub mod proc_net;

pub use connection::LocalConnection;
pub use coordinator::{Coordinator, ShutdownReason};
pub use forwarder::{ForwardStats, ForwarderError, StreamForwarder};
pub use notifier::{NotifyError, PortNotifier};
pub use port_watcher::{PortSource, PortWatcher, WatcherConfig, WatcherConfigError};
pub use proc_net::{PortScanError, ProcNetTcp};
