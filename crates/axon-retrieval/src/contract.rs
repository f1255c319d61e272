//! Startup verification that the vector collection and the embedding
//! model agree on dimension and metric. A mismatch would silently
//! return garbage similarities, so strict mode refuses to boot.

use tracing::{error, info};

use axon_clients::embeddings::EmbeddingsClient;

use crate::error::{RetrievalError, Result};
use crate::milvus::{MilvusBackend, METRIC};

/// Verify the embedding contract against the live collection.
///
/// Under strict mode any mismatch (or inability to verify) is fatal;
/// otherwise it is logged and startup continues.
pub async fn verify_embedding_contract(
    milvus: &MilvusBackend,
    embeddings: &EmbeddingsClient,
    strict: bool,
) -> Result<()> {
    let declared = match milvus.collection_dimension().await {
        Ok(d) => d,
        Err(e) if strict => return Err(e),
        Err(e) => {
            error!(err = %e, "could not verify collection dimension, continuing (strict mode off)");
            return Ok(());
        }
    };

    let observed = match embeddings.probe_dimension().await {
        Ok(d) => d,
        Err(e) if strict => return Err(RetrievalError::Embedding(e)),
        Err(e) => {
            error!(err = %e, "could not probe embedding dimension, continuing (strict mode off)");
            return Ok(());
        }
    };

    if declared != observed || observed != embeddings.expected_dimension {
        let detail = format!(
            "collection dimension {declared}, model output {observed}, configured {}",
            embeddings.expected_dimension
        );
        error!(declared, observed, configured = embeddings.expected_dimension, "embedding dimension mismatch");
        if strict {
            return Err(RetrievalError::Contract(detail));
        }
        return Ok(());
    }

    info!(dimension = declared, metric = METRIC, "embedding contract verified");
    Ok(())
}
