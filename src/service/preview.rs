//! Preview image encoding boundary
//!
//! Sampled keyframes arrive as Annex-B H.264 access units. Turning them into
//! a still image is left to a [`PreviewEncoder`]; the default
//! [`PassthroughPreview`] forwards the access unit untouched.

use bytes::Bytes;

use crate::error::ServiceError;

/// An encoded preview ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub data: Bytes,
    /// Picture dimensions, when the encoder decoded the frame
    pub dimensions: Option<(u32, u32)>,
}

/// Converts a sampled keyframe into a deliverable preview
pub trait PreviewEncoder: Send + Sync {
    /// Returns `Ok(None)` when the frame yields no picture
    fn encode(&self, keyframe: &Bytes) -> Result<Option<PreviewImage>, ServiceError>;
}

/// Delivers the raw keyframe as the preview
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPreview;

impl PreviewEncoder for PassthroughPreview {
    fn encode(&self, keyframe: &Bytes) -> Result<Option<PreviewImage>, ServiceError> {
        if keyframe.is_empty() {
            return Ok(None);
        }
        Ok(Some(PreviewImage {
            data: keyframe.clone(),
            dimensions: None,
        }))
    }
}
