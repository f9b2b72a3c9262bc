//! Per-archive streaming: byte sources, the WARC codec, checkpoints and the
//! processor tying them together

pub mod checkpoint;
pub mod processor;
pub mod source;
pub mod warc;

pub use checkpoint::{find_latest_checkpoint, latest_checkpoint, Checkpoint};
pub use processor::{ArchiveProcessor, ProcessStats, ProcessorOptions, ProgressObserver, TracingObserver};
pub use source::{ArchiveSource, HttpArchiveSource, LocalArchiveSource};
pub use warc::{WarcReader, WarcRecord};
