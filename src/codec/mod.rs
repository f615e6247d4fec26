//! Pixel codecs selected by transfer syntax.

use std::fmt;

use crate::{config::EncodeOptions, frame::Frame, CodecError, CommonResult};

pub mod jpeg;
pub mod raw;
pub mod rle;

pub use jpeg::JpegCodec;
pub use raw::RawCodec;
pub use rle::RleCodec;

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
pub const JPEG_EXTENDED: &str = "1.2.840.10008.1.2.4.51";
pub const JPEG_LOSSLESS: &str = "1.2.840.10008.1.2.4.57";
pub const JPEG_LOSSLESS_FIRST_ORDER: &str = "1.2.840.10008.1.2.4.70";

/// Pixel attributes of a frame as stored in the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub bits_allocated: u32,
    pub bits_stored: u32,
    pub high_bit: u32,
    pub signed: bool,
    pub planar: bool,
    pub color_space: String,
    pub transfer_syntax: String,
}

impl FrameLayout {
    pub fn samples(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Bytes of one uncompressed frame, bit packed when needed.
    pub fn frame_bytes(&self) -> usize {
        (self.samples() * self.bits_allocated as usize).div_ceil(8)
    }

    /// Bits of each sample that carry data, below and including the high bit.
    pub fn mask(&self) -> u32 {
        let high_bit = self.high_bit.max(self.bits_stored.saturating_sub(1)).min(31);
        let stored = self.bits_stored.min(high_bit + 1);
        let top = if high_bit >= 31 {
            u32::MAX
        } else {
            (1u32 << (high_bit + 1)) - 1
        };
        let bottom = (1u64 << (high_bit + 1 - stored)) as u32 - 1;
        top - bottom
    }

    /// Sign extends a masked sample when the layout is signed.
    pub fn extend_sign(&self, value: u32) -> i32 {
        if !self.signed {
            return value as i32;
        }
        let high_bit = self.high_bit.min(31);
        if high_bit == 31 || value & (1 << high_bit) == 0 {
            value as i32
        } else {
            (value | !((1u32 << (high_bit + 1)) - 1)) as i32
        }
    }
}

pub trait PixelCodec: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn can_handle(&self, transfer_syntax: &str) -> bool;

    /// Whether frames are stored as fragments of an undefined length element.
    fn is_encapsulated(&self, transfer_syntax: &str) -> bool;

    /// Bits Allocated to store samples whose most significant bit is `high_bit`.
    fn suggest_allocated_bits(&self, transfer_syntax: &str, high_bit: u32) -> u32;

    fn decode(&self, data: &[u8], layout: &FrameLayout) -> CommonResult<Frame>;

    fn encode(
        &self,
        frame: &Frame,
        layout: &FrameLayout,
        options: &EncodeOptions,
    ) -> CommonResult<Vec<u8>>;

    /// Photometric interpretation recorded for frames of `color_space` once
    /// encoded with `options`.
    fn encoded_color_space(
        &self,
        _transfer_syntax: &str,
        color_space: &str,
        _options: &EncodeOptions,
    ) -> String {
        color_space.to_string()
    }
}

/// Set of codecs consulted in registration order.
#[derive(Debug, Default)]
pub struct CodecRegistry {
    codecs: Vec<Box<dyn PixelCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RawCodec));
        registry.register(Box::new(RleCodec));
        registry.register(Box::new(JpegCodec));
        registry
    }

    pub fn register(&mut self, codec: Box<dyn PixelCodec>) {
        self.codecs.push(codec);
    }

    pub fn codecs(&self) -> impl Iterator<Item = &dyn PixelCodec> {
        self.codecs.iter().map(|codec| codec.as_ref())
    }

    pub fn codec_for(&self, transfer_syntax: &str) -> CommonResult<&dyn PixelCodec> {
        let codec = self
            .codecs()
            .find(|codec| codec.can_handle(transfer_syntax))
            .ok_or_else(|| CodecError::UnsupportedTransferSyntax(transfer_syntax.to_string()))?;
        tracing::debug!(codec = codec.name(), %transfer_syntax, "codec selected");
        Ok(codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(bits_stored: u32, high_bit: u32, signed: bool) -> FrameLayout {
        FrameLayout {
            width: 2,
            height: 2,
            channels: 1,
            bits_allocated: 16,
            bits_stored,
            high_bit,
            signed,
            planar: false,
            color_space: "MONOCHROME2".into(),
            transfer_syntax: EXPLICIT_VR_LITTLE_ENDIAN.into(),
        }
    }

    #[test]
    fn mask_covers_stored_bits() {
        assert_eq!(layout(12, 11, false).mask(), 0x0FFF);
        assert_eq!(layout(8, 15, false).mask(), 0xFF00);
        assert_eq!(layout(16, 3, false).mask(), 0xFFFF);
    }

    #[test]
    fn sign_extension_uses_high_bit() {
        assert_eq!(layout(12, 11, true).extend_sign(0x0FFF), -1);
        assert_eq!(layout(12, 11, true).extend_sign(0x07FF), 2047);
        assert_eq!(layout(12, 11, false).extend_sign(0x0FFF), 4095);
    }

    #[test]
    fn registry_dispatches_by_transfer_syntax() {
        let registry = CodecRegistry::with_defaults();

        assert_eq!(registry.codec_for(IMPLICIT_VR_LITTLE_ENDIAN).unwrap().name(), "raw");
        assert_eq!(registry.codec_for(RLE_LOSSLESS).unwrap().name(), "rle");
        assert_eq!(registry.codec_for(JPEG_LOSSLESS).unwrap().name(), "jpeg");
        assert!(matches!(
            registry.codec_for("1.2.840.10008.1.2.4.90"),
            Err(CodecError::UnsupportedTransferSyntax(_))
        ));
        assert!(CodecRegistry::new().codec_for(EXPLICIT_VR_LITTLE_ENDIAN).is_err());
    }
}
