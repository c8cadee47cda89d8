use std::{fmt, str::FromStr};

/// Compute device the inference session should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Best available accelerator, else CPU.
    #[default]
    Auto,
    Cpu,
    Cuda(i32),
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_lowercase();
        match value.as_str() {
            "" | "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            other => {
                let id = other
                    .strip_prefix("cuda:")
                    .or_else(|| other.strip_prefix("gpu:"))
                    // Bare ordinals ("0", "1") name a CUDA device.
                    .or(Some(other))
                    .and_then(|id| id.parse::<i32>().ok())
                    .filter(|id| *id >= 0)
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "{} is not a supported device. Use `auto`, `cpu`, `cuda` or `cuda:<id>`.",
                            s
                        )
                    })?;
                Ok(Device::Cuda(id))
            }
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Auto => write!(f, "auto"),
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}
