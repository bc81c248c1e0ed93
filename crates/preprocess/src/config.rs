use std::str::FromStr;

/// Square input size used by SSD-style anchor-grid models.
pub const DEFAULT_INPUT_SIZE: u32 = 300;

/// Fill value for the padding band added by [`ResizePolicy::Letterbox`].
pub const LETTERBOX_COLOR: u8 = 114;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How a frame of arbitrary shape is fitted into the square model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizePolicy {
    /// Scale each axis independently to fill the input. Box coordinates in
    /// normalized space map one-to-one onto the original frame.
    #[default]
    Stretch,
    /// Preserve aspect ratio and pad the remainder with [`LETTERBOX_COLOR`].
    /// Boxes must be mapped back through [`crate::FrameTransform`].
    Letterbox,
}

impl FromStr for ResizePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stretch" => Ok(ResizePolicy::Stretch),
            "letterbox" => Ok(ResizePolicy::Letterbox),
            other => anyhow::bail!("Unknown resize policy '{}'", other),
        }
    }
}

/// Per-channel value mapping applied after resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// `x / 255`, values in [0, 1].
    #[default]
    UnitRange,
    /// `(x / 255 - mean) / std` with ImageNet statistics.
    ImageNet,
}

impl Normalization {
    #[inline]
    pub fn apply(&self, value: u8, channel: usize) -> f32 {
        let unit = value as f32 / 255.0;
        match self {
            Normalization::UnitRange => unit,
            Normalization::ImageNet => (unit - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
        }
    }
}

impl FromStr for Normalization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unit" | "unit-range" => Ok(Normalization::UnitRange),
            "imagenet" => Ok(Normalization::ImageNet),
            other => anyhow::bail!("Unknown normalization '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_policy_parsing() {
        assert_eq!("Stretch".parse::<ResizePolicy>().unwrap(), ResizePolicy::Stretch);
        assert_eq!(" letterbox ".parse::<ResizePolicy>().unwrap(), ResizePolicy::Letterbox);
        assert!("crop".parse::<ResizePolicy>().is_err());
    }

    #[test]
    fn test_unit_range_normalization() {
        assert_eq!(Normalization::UnitRange.apply(0, 0), 0.0);
        assert_eq!(Normalization::UnitRange.apply(255, 2), 1.0);
    }
}
