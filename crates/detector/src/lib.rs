pub mod annotate;
pub mod backend;
pub mod config;
pub mod detector;
pub mod device;
pub mod error;
pub mod names;
pub mod processing;

// Re-export commonly used types for convenience
pub use annotate::Annotator;
pub use backend::{InferenceBackend, InferenceOutput};
pub use config::DetectorConfig;
pub use detector::{Detect, ObjectDetector, Prediction};
pub use device::Device;
pub use error::DetectorError;
pub use names::ClassNames;
pub use processing::post::Detection;
