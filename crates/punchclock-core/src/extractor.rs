//! Seam for the face recognizer that turns a captured image into an embedding.
//!
//! The recognizer itself lives outside this workspace; anything that can
//! produce a fixed-length vector from image bytes plugs in here.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected in the image")]
    FaceNotFound,
    #[error("unsupported image: {0}")]
    InvalidImage(String),
    #[error("recognizer failed: {0}")]
    Recognizer(String),
}

/// Produces a face embedding from raw image bytes.
pub trait EmbeddingExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Embedding, ExtractError>;
}

/// Extractor for callers that already ran the recognizer and hand over the
/// embedding as a JSON array. An empty array means the recognizer saw no face.
pub struct JsonEmbeddingExtractor;

impl EmbeddingExtractor for JsonEmbeddingExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Embedding, ExtractError> {
        let values: Vec<f32> = serde_json::from_slice(image)
            .map_err(|e| ExtractError::InvalidImage(format!("expected JSON float array: {e}")))?;
        if values.is_empty() {
            return Err(ExtractError::FaceNotFound);
        }
        Ok(Embedding::new(values))
    }
}
