use crate::device::Device;
use anyhow::Context;
use std::{env, path::PathBuf, str::FromStr};

pub const DEFAULT_WEIGHTS_PATH: &str = "model/best.onnx";
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_MAX_DETECTIONS: usize = 300;
pub const DEFAULT_INTRA_THREADS: usize = 4;

/// Stride of the YOLO feature pyramid; the square input must be a multiple of it.
const MODEL_STRIDE: u32 = 32;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub weights_path: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub device: Device,
    pub max_detections: usize,
    pub font_path: Option<PathBuf>,
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from(DEFAULT_WEIGHTS_PATH),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
            device: Device::Auto,
            max_detections: DEFAULT_MAX_DETECTIONS,
            font_path: None,
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset keys take their
    /// default, malformed values are an error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let weights_path = lookup("WEIGHTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WEIGHTS_PATH));

        let confidence_threshold = parse_or(&lookup, "CONF", DEFAULT_CONFIDENCE_THRESHOLD)?;
        let iou_threshold = parse_or(&lookup, "IOU", DEFAULT_IOU_THRESHOLD)?;
        let input_size = parse_or(&lookup, "IMG_SIZE", DEFAULT_INPUT_SIZE)?;
        let device = parse_or(&lookup, "DEVICE", Device::Auto)?;
        let max_detections = parse_or(&lookup, "MAX_DET", DEFAULT_MAX_DETECTIONS)?;
        let intra_threads = parse_or(&lookup, "INTRA_THREADS", DEFAULT_INTRA_THREADS)?;

        let font_path = lookup("FONT_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let config = Self {
            weights_path,
            confidence_threshold,
            iou_threshold,
            input_size,
            device,
            max_detections,
            font_path,
            intra_threads,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            anyhow::bail!(
                "CONF must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            anyhow::bail!("IOU must be within [0, 1], got {}", self.iou_threshold);
        }
        if self.input_size == 0 || self.input_size % MODEL_STRIDE != 0 {
            anyhow::bail!(
                "IMG_SIZE must be a positive multiple of {}, got {}",
                MODEL_STRIDE,
                self.input_size
            );
        }
        if self.max_detections == 0 {
            anyhow::bail!("MAX_DET must be at least 1");
        }
        if self.intra_threads == 0 {
            anyhow::bail!("INTRA_THREADS must be at least 1");
        }
        Ok(())
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            weights_path: PathBuf::from("/models/model.onnx"),
            input_size: 64,
            ..Self::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value {:?} for {}", raw, key)),
        None => Ok(default),
    }
}
