use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to load model: {0}")]
    Load(#[source] anyhow::Error),

    #[error("Invalid image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Inference failed: {0}")]
    Inference(#[source] anyhow::Error),

    #[error("Failed to encode annotated image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
