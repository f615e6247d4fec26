use crate::codec::EXPLICIT_VR_LITTLE_ENDIAN;

/// Controls how a stream is parsed into a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Values longer than this are left in the source and loaded on first access.
    pub lazy_load_threshold: u32,
    /// Deepest sequence nesting accepted before failing.
    pub max_depth: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            lazy_load_threshold: u32::MAX,
            max_depth: 16,
        }
    }
}

impl ParseOptions {
    pub fn with_lazy_load_threshold(mut self, threshold: u32) -> Self {
        self.lazy_load_threshold = threshold;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Lossy compression level. The value scales the default quantization tables
/// (`Medium` leaves them untouched).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Quality {
    VeryHigh = 0,
    High = 100,
    AboveMedium = 200,
    #[default]
    Medium = 300,
    BelowMedium = 400,
    Low = 500,
    VeryLow = 600,
}

impl Quality {
    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn subsample_horizontal(self) -> bool {
        self > Quality::High
    }

    pub fn subsample_vertical(self) -> bool {
        self > Quality::Medium
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    pub transfer_syntax: String,
    pub quality: Quality,
    /// Store channels one after the other instead of interleaved.
    pub planar: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            transfer_syntax: EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
            quality: Quality::default(),
            planar: false,
        }
    }
}

impl EncodeOptions {
    pub fn new(transfer_syntax: &str) -> Self {
        Self {
            transfer_syntax: transfer_syntax.to_string(),
            ..Default::default()
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_planar(mut self, planar: bool) -> Self {
        self.planar = planar;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsampling_follows_quality() {
        assert!(!Quality::High.subsample_horizontal());
        assert!(Quality::AboveMedium.subsample_horizontal());
        assert!(!Quality::Medium.subsample_vertical());
        assert!(Quality::Low.subsample_vertical());
    }

    #[test]
    fn defaults() {
        let options = ParseOptions::default();
        assert_eq!(options.max_depth, 16);
        assert_eq!(options.lazy_load_threshold, u32::MAX);
        assert_eq!(EncodeOptions::default().quality.value(), 300);
    }
}
