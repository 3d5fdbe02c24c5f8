//! Asynchronous ingestion: extract, chunk, embed, and index sources, plus
//! the periodic scheduler that re-enqueues refresh-eligible sources.

pub mod chunker;
pub mod error;
pub mod extract;
pub mod refresh;
pub mod worker;

pub use chunker::{chunk_text, TextChunk, CHUNK_OVERLAP_CHARS, MAX_CHUNK_CHARS};
pub use error::{IngestError, Result};
pub use refresh::{RefreshScheduler, REFRESH_INTERVAL_SECS, REFRESH_JOB};
pub use worker::{IngestWorker, INGEST_JOB};
