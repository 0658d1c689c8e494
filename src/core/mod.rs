//! Memory-mapped append-only arena: the transport primitive every higher
//! layer (pub/sub, discovery, the rule pipeline) is built on.

pub mod clock;
pub mod control;
pub mod error;
pub mod header;
pub mod mmap;
pub mod reader;
pub mod retention;
pub mod segment;
pub mod wait;
pub mod writer;
pub mod writer_lock;

pub use clock::{Clock, QuantaClock, SystemClock};
pub use error::{Error, Result};
pub use reader::{
    DisconnectReason, MessageView, QueueReader, ReaderConfig, StartMode, WaitStrategy,
    WriterStatus,
};
pub use retention::RetentionConfig;
pub use writer::{BackpressurePolicy, Queue, QueueWriter, WriterConfig, WriterMetrics};
pub use writer_lock::writer_alive;
