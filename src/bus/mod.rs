//! Source discovery and liveness coordination.
//!
//! `discovery` enumerates the arena root for paths matching a rule's
//! `(protocol, topic-glob)` selector. `ready` implements the deadman beacon
//! the supervisor waits on before treating the daemon as live.

pub mod discovery;
pub mod ready;

pub use discovery::{DiscoveryEvent, Selector, Watcher};
pub use ready::{is_ready, mark_ready};
