use super::{InferenceBackend, InferenceOutput};
use crate::{config::DetectorConfig, device::Device, names::ClassNames};
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::path::Path;

const INPUT_NAME: &str = "images";
const OUTPUT_NAME: &str = "output0";
const NAMES_METADATA_KEY: &str = "names";

pub struct OrtBackend {
    session: Session,
    class_names: ClassNames,
}

impl OrtBackend {
    /// Load model on the requested device.
    ///
    /// `Device::Auto` uses CUDA when the execution provider is available and
    /// otherwise stays on CPU. An explicit `Device::Cuda` fails if CUDA cannot
    /// be registered.
    pub fn load_model_on_device(
        path: &Path,
        device: Device,
        intra_threads: usize,
    ) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("Model file not found: {}", path.display());
        }

        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?;

        match resolve_device(device) {
            Device::Cuda(device_id) => {
                tracing::info!(device_id, "Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build()
                    .error_on_failure()])?;
            }
            Device::Cpu | Device::Auto => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;

        let class_names = match session.metadata()?.custom(NAMES_METADATA_KEY) {
            Some(raw) => ClassNames::parse_or_empty(&raw),
            None => {
                tracing::warn!("Model has no class names metadata, labels will be class ids");
                ClassNames::default()
            }
        };

        tracing::info!(
            path = %path.display(),
            num_classes = class_names.len(),
            "Model loaded"
        );

        Ok(Self {
            session,
            class_names,
        })
    }
}

fn resolve_device(device: Device) -> Device {
    match device {
        Device::Auto => {
            let cuda_available = CUDAExecutionProvider::default()
                .is_available()
                .unwrap_or(false);
            if cuda_available {
                Device::Cuda(0)
            } else {
                Device::Cpu
            }
        }
        explicit => explicit,
    }
}

impl InferenceBackend for OrtBackend {
    fn load_model(config: &DetectorConfig) -> anyhow::Result<Self> {
        Self::load_model_on_device(&config.weights_path, config.device, config.intra_threads)
    }

    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        let outputs = self.session.run(ort::inputs![
            INPUT_NAME => TensorRef::from_array_view(images.view())?
        ])?;

        let predictions = outputs[OUTPUT_NAME].try_extract_array::<f32>()?;

        Ok(InferenceOutput {
            predictions: predictions.into_owned(),
        })
    }

    fn class_names(&self) -> ClassNames {
        self.class_names.clone()
    }
}
