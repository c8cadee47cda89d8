use crate::{
    annotate::Annotator,
    backend::{InferenceBackend, InferenceOutput},
    config::DetectorConfig,
    error::DetectorError,
    names::ClassNames,
    processing::{
        post::{Detection, PostProcessor},
        pre::PreProcessor,
    },
};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use uuid::Uuid;

pub const JPEG_QUALITY: u8 = 90;

/// Result of one `predict` call.
///
/// `annotated` has the input's dimensions and RGB channel order, which is
/// what the JPEG encoder consumes.
#[derive(Debug)]
pub struct Prediction {
    pub detections: Vec<Detection>,
    pub annotated: RgbImage,
}

/// Object-safe view of a detector, shared between request handlers.
pub trait Detect: Send + Sync {
    fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, DetectorError>;

    fn save_annotated(&self, image: &RgbImage, out_dir: &Path) -> Result<PathBuf, DetectorError>;
}

/// Wraps one loaded model with fixed thresholds.
///
/// Only the backend call is serialised; decoding, letterboxing, NMS and
/// drawing run concurrently across callers.
pub struct ObjectDetector<B: InferenceBackend> {
    backend: Mutex<B>,
    config: DetectorConfig,
    class_names: ClassNames,
    preprocessor: PreProcessor,
    postprocessor: PostProcessor,
    annotator: Annotator,
}

impl<B: InferenceBackend> ObjectDetector<B> {
    pub fn new(backend: B, config: DetectorConfig, annotator: Annotator) -> Self {
        let class_names = backend.class_names();
        let preprocessor = PreProcessor::new(config.input_size);
        let postprocessor = PostProcessor::new(
            config.confidence_threshold,
            config.iou_threshold,
            config.max_detections,
        );
        Self {
            backend: Mutex::new(backend),
            config,
            class_names,
            preprocessor,
            postprocessor,
            annotator,
        }
    }

    /// Load weights and label font named by `config`. Any failure here is
    /// a startup error.
    #[tracing::instrument(skip_all, fields(weights = %config.weights_path.display(), device = %config.device))]
    pub fn load(config: DetectorConfig) -> Result<Self, DetectorError> {
        config.validate().map_err(DetectorError::Load)?;

        tracing::info!("Loading detection model");
        let backend = B::load_model(&config).map_err(DetectorError::Load)?;
        let annotator =
            Annotator::from_font_path(config.font_path.as_deref()).map_err(DetectorError::Load)?;
        tracing::info!("Detection model loaded");

        Ok(Self::new(backend, config, annotator))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    fn decode(image_bytes: &[u8]) -> Result<RgbImage, DetectorError> {
        let image = image::load_from_memory(image_bytes).map_err(DetectorError::Decode)?;
        Ok(image.to_rgb8())
    }

    fn run_inference(&self, image: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        let (input, transform) = self.preprocessor.preprocess(image)?;

        let InferenceOutput { predictions } = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| anyhow::anyhow!("Inference backend lock poisoned"))?;
            backend.infer(&input)?
        };

        self.postprocessor
            .parse_detections(&predictions.view(), &transform, &self.class_names)
    }
}

impl<B: InferenceBackend> Detect for ObjectDetector<B> {
    #[tracing::instrument(skip_all, fields(bytes = image_bytes.len()))]
    fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, DetectorError> {
        let image = Self::decode(image_bytes)?;
        tracing::debug!(width = image.width(), height = image.height(), "Decoded image");

        let detections = self
            .run_inference(&image)
            .map_err(DetectorError::Inference)?;

        let mut annotated = image;
        self.annotator.draw(&mut annotated, &detections);

        tracing::debug!(count = detections.len(), "Prediction complete");
        Ok(Prediction {
            detections,
            annotated,
        })
    }

    #[tracing::instrument(skip_all, fields(out_dir = %out_dir.display()))]
    fn save_annotated(&self, image: &RgbImage, out_dir: &Path) -> Result<PathBuf, DetectorError> {
        fs::create_dir_all(out_dir)?;

        let file_name = format!("{}.jpg", Uuid::new_v4().simple());
        let path = out_dir.join(file_name);

        // create_new: a name collision is an error, never an overwrite
        let file = File::options().write(true).create_new(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
            .encode_image(image)
            .map_err(DetectorError::Encode)?;
        writer.flush()?;

        tracing::debug!(path = %path.display(), "Saved annotated image");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use ndarray::{Array, IxDyn};
    use std::{
        collections::{HashMap, HashSet},
        io::Cursor,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Emits one fixed raw-layout output regardless of the input, and counts calls.
    struct FakeBackend {
        predictions: Array<f32, IxDyn>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        /// Two classes, two anchors: a person box and a low-score bicycle box,
        /// both in 64x64 input space.
        fn with_person() -> Self {
            let n = 2;
            let features = 4 + 2;
            let rows: [[f32; 6]; 2] = [
                [32.0, 32.0, 20.0, 20.0, 0.9, 0.0],
                [10.0, 10.0, 8.0, 8.0, 0.0, 0.1],
            ];
            let mut data = vec![0.0f32; features * n];
            for (i, row) in rows.iter().enumerate() {
                for (f, v) in row.iter().enumerate() {
                    data[f * n + i] = *v;
                }
            }
            Self {
                predictions: Array::from_shape_vec(IxDyn(&[1, features, n]), data).unwrap(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn empty() -> Self {
            Self {
                predictions: Array::zeros(IxDyn(&[1, 6, 0])),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl InferenceBackend for FakeBackend {
        fn load_model(_config: &DetectorConfig) -> anyhow::Result<Self> {
            Ok(Self::with_person())
        }

        fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
            assert_eq!(images.shape(), &[1, 3, 64, 64]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InferenceOutput {
                predictions: self.predictions.clone(),
            })
        }

        fn class_names(&self) -> ClassNames {
            ClassNames::new(HashMap::from([(0, "person".to_string())]))
        }
    }

    struct FailingBackend;

    impl InferenceBackend for FailingBackend {
        fn load_model(_config: &DetectorConfig) -> anyhow::Result<Self> {
            anyhow::bail!("weights missing")
        }

        fn infer(&mut self, _images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
            anyhow::bail!("device lost")
        }

        fn class_names(&self) -> ClassNames {
            ClassNames::default()
        }
    }

    fn detector_with(backend: FakeBackend) -> ObjectDetector<FakeBackend> {
        ObjectDetector::new(backend, DetectorConfig::test_default(), Annotator::default())
    }

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_predict_maps_boxes_to_original_image() {
        let detector = detector_with(FakeBackend::with_person());

        // 128x128 into 64: scale 0.5, no padding
        let prediction = detector.predict(&png_bytes(128, 128, [0, 0, 0])).unwrap();

        assert_eq!(prediction.detections.len(), 1, "Low-score box filtered");
        let det = &prediction.detections[0];
        assert_eq!(det.name, "person");
        assert_eq!(det.cls, 0);
        assert_eq!((det.x1, det.y1, det.x2, det.y2), (44.0, 44.0, 84.0, 84.0));
        assert!(det.conf >= detector.config().confidence_threshold);
        assert!(det.x1 < det.x2 && det.y1 < det.y2);
    }

    #[test]
    fn test_annotated_image_keeps_input_dimensions() {
        let detector = detector_with(FakeBackend::with_person());
        let prediction = detector.predict(&png_bytes(128, 96, [0, 0, 0])).unwrap();

        assert_eq!(prediction.annotated.dimensions(), (128, 96));
        assert_ne!(
            *prediction.annotated.get_pixel(prediction.detections[0].x1 as u32, 48),
            Rgb([0, 0, 0]),
            "Box outline should be drawn"
        );
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let detector = detector_with(FakeBackend::empty());
        let prediction = detector.predict(&png_bytes(40, 40, [9, 9, 9])).unwrap();

        assert!(prediction.detections.is_empty());
        assert_eq!(*prediction.annotated.get_pixel(20, 20), Rgb([9, 9, 9]));
    }

    #[test]
    fn test_invalid_bytes_are_a_decode_error() {
        let backend = FakeBackend::with_person();
        let calls = backend.calls.clone();
        let detector = detector_with(backend);

        let err = detector.predict(b"GIF89a but not really").unwrap_err();
        assert!(matches!(err, DetectorError::Decode(_)), "got {:?}", err);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "Model must not run");
    }

    #[test]
    fn test_backend_failure_is_an_inference_error() {
        let detector = ObjectDetector::new(
            FailingBackend,
            DetectorConfig::test_default(),
            Annotator::default(),
        );

        let err = detector.predict(&png_bytes(16, 16, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, DetectorError::Inference(_)), "got {:?}", err);
    }

    #[test]
    fn test_load_failure_is_a_load_error() {
        let result = ObjectDetector::<FailingBackend>::load(DetectorConfig::test_default());
        assert!(matches!(result, Err(DetectorError::Load(_))));
    }

    #[test]
    fn test_predict_is_deterministic() {
        let detector = detector_with(FakeBackend::with_person());
        let bytes = png_bytes(100, 60, [30, 60, 90]);

        let first = detector.predict(&bytes).unwrap();
        let second = detector.predict(&bytes).unwrap();

        assert_eq!(first.detections, second.detections);
        assert_eq!(first.annotated, second.annotated);
    }

    #[test]
    fn test_save_annotated_writes_unique_jpegs() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("static").join("outputs");
        let detector = detector_with(FakeBackend::with_person());
        let image = RgbImage::from_pixel(20, 10, Rgb([200, 10, 10]));

        let mut seen = HashSet::new();
        for _ in 0..5 {
            let path = detector.save_annotated(&image, &out_dir).unwrap();
            assert!(path.exists(), "{} should exist", path.display());
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));

            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap();
            assert_eq!(stem.len(), 32);
            assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));

            assert!(seen.insert(path), "File names must not collide");
        }
    }

    #[test]
    fn test_saved_jpeg_keeps_rgb_channel_order() {
        let dir = tempfile::tempdir().unwrap();
        let detector = detector_with(FakeBackend::empty());

        let prediction = detector.predict(&png_bytes(32, 32, [220, 20, 20])).unwrap();
        let path = detector
            .save_annotated(&prediction.annotated, dir.path())
            .unwrap();

        let reloaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(reloaded.dimensions(), (32, 32));
        let Rgb([r, g, b]) = *reloaded.get_pixel(16, 16);
        assert!(r > 180 && g < 60 && b < 60, "Red stays red, got {:?}", (r, g, b));
    }

    #[test]
    fn test_save_fails_when_output_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("outputs");
        fs::write(&blocker, b"not a directory").unwrap();
        let detector = detector_with(FakeBackend::empty());

        let err = detector
            .save_annotated(&RgbImage::new(4, 4), &blocker)
            .unwrap_err();
        assert!(matches!(err, DetectorError::Io(_)), "got {:?}", err);
    }

    #[test]
    fn test_concurrent_predictions_share_one_model() {
        let backend = FakeBackend::with_person();
        let calls = backend.calls.clone();
        let detector = Arc::new(detector_with(backend));
        let bytes = Arc::new(png_bytes(64, 64, [0, 0, 0]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let detector = detector.clone();
                let bytes = bytes.clone();
                std::thread::spawn(move || detector.predict(&bytes).unwrap().detections)
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }
}
