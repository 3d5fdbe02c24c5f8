//! Vector store adapter. One logical collection shared by every tenant;
//! isolation is enforced by payload filters on every call; `search` can
//! never return a vector whose payload tenant differs from the caller's.

pub mod error;
pub mod memory;
pub mod qdrant;
pub mod store;

pub use error::{Result, VectorError};
pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
pub use store::{connect, VectorHit, VectorPayload, VectorPoint, VectorStore};
