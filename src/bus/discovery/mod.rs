//! Periodic root-directory scan that surfaces newly matching source arenas.

pub mod watcher;

pub use watcher::{DiscoveryEvent, Selector, Watcher};
