//! Local Feature-Hashing Embedder
//!
//! Deterministic bag-of-words embeddings: each normalized token is hashed
//! into one of `dimension` buckets and the result is L2-normalized. Good
//! enough for lexical retrieval when no embedding API is configured, and
//! fully reproducible in tests.

use async_trait::async_trait;

use super::embedding_provider::{EmbeddingProvider, EmbeddingProviderType, EmbeddingResult};

pub struct LocalHashEmbeddingProvider {
    dimension: usize,
    display_name: String,
}

impl LocalHashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            display_name: format!("Local feature hash ({}d)", dimension),
        }
    }

    /// Embed one text. Never returns the zero vector, so cosine distance
    /// stays defined for empty input.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];

        for word in text.split_whitespace() {
            let token: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if token.is_empty() {
                continue;
            }
            let mut h: u32 = 0;
            for b in token.bytes() {
                h = h.wrapping_mul(31).wrapping_add(b as u32);
            }
            vec[(h as usize) % self.dimension] += 1.0;
        }

        // L2 normalize
        let mag: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if mag > 0.0 {
            for v in &mut vec {
                *v /= mag;
            }
        } else {
            vec[0] = 1.0;
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for LocalHashEmbeddingProvider {
    async fn embed_documents(&self, documents: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(documents.iter().map(|d| self.embed(d)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> EmbeddingResult<()> {
        Ok(())
    }

    fn is_local(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        usize::MAX
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::Local
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}
