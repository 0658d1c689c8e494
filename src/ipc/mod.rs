//! High-level IPC communication pattern built on arena queues.
//!
//! This module provides a thin, near-zero-cost pub/sub wrapper over the
//! low-level queue primitives in `crate::core`. It is the transport the
//! daemon's discovery, trigger, control, and rotating-writer code all use
//! to attach to arenas by path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  Publisher   │
//! │  (1 Writer)  │
//! └──────┬───────┘
//!        │ writes to queue
//!        ▼
//! ┌──────────────────────┐
//! │   Queue Directory    │
//! │  (mmap'd segments)   │
//! └──┬────────────┬──────┘
//!    │            │
//!    ▼            ▼
//! ┌─────────┐  ┌─────────┐
//! │Subscriber│  │Subscriber│
//! │(Reader 1)│  │(Reader 2)│
//! └─────────┘  └─────────┘
//! ```
//!
//! Each subscriber maintains an independent read offset and can consume at
//! its own pace.
//!
//! # Example
//!
//! ```no_run
//! use arenalog::ipc::pubsub::{Publisher, Subscriber};
//!
//! let mut feed = Publisher::open("./data/market/binance_spot")?;
//! feed.publish(0, b"tick")?;
//!
//! let mut strategy = Subscriber::open("./data/market/binance_spot", "strategy_momentum")?;
//! while let Some(msg) = strategy.recv()? {
//!     let _ = msg.payload;
//!     strategy.commit()?;
//! }
//! # Ok::<(), arenalog::core::Error>(())
//! ```

pub mod pubsub;

// Re-export core types needed by IPC users
pub use crate::core::{
    BackpressurePolicy, DisconnectReason, MessageView, ReaderConfig, StartMode, WaitStrategy,
    WriterConfig, WriterStatus,
};

// Re-export pattern types
pub use pubsub::{Publisher, Subscriber};
