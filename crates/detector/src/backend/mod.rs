use crate::{config::DetectorConfig, names::ClassNames};
use ndarray::{Array, IxDyn};

#[cfg(feature = "ort-backend")]
pub mod ort;

pub trait InferenceBackend: Send {
    fn load_model(config: &DetectorConfig) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Run inference on a letterboxed `[1, 3, S, S]` RGB tensor scaled to 0-1
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput>;

    /// Label mapping shipped with the weights. Empty if the model has none.
    fn class_names(&self) -> ClassNames;
}

pub struct InferenceOutput {
    /// Either `[1, 4 + nc, anchors]` (cxcywh + class scores, input pixel space)
    /// or the end-to-end layout `[1, max_det, 6]` (xyxy, score, class).
    pub predictions: ndarray::ArrayD<f32>,
}
