//! Grounded retrieval: a vector-store backend and an external
//! retrieval-engine backend behind one capability, with deterministic
//! fallback, a bounded TTL cache, and a startup embedding-contract check.

pub mod backend;
pub mod cache;
pub mod contract;
pub mod error;
pub mod milvus;
pub mod ragflow;
pub mod search;

pub use backend::SearchBackend;
pub use error::{RetrievalError, Result};
pub use search::{Retriever, SearchOutcome, Service};
