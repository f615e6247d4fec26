use std::path::Path;

use image::{DynamicImage, ImageBuffer, Luma, Rgb};

use crate::{CodecError, CommonResult};

/// Decoded samples of one frame, channels interleaved, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Significant bits per sample (high bit + 1).
    pub bit_depth: u32,
    pub signed: bool,
    pub color_space: String,
    pub samples: Vec<i32>,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        channels: u32,
        bit_depth: u32,
        signed: bool,
        color_space: &str,
    ) -> Self {
        Self {
            width,
            height,
            channels,
            bit_depth,
            signed,
            color_space: color_space.to_string(),
            samples: vec![0; width as usize * height as usize * channels as usize],
        }
    }

    pub fn from_samples(
        width: u32,
        height: u32,
        channels: u32,
        bit_depth: u32,
        signed: bool,
        color_space: &str,
        samples: Vec<i32>,
    ) -> CommonResult<Self> {
        let mut frame = Self::new(width, height, channels, bit_depth, signed, color_space);
        if samples.len() != frame.samples.len() {
            return Err(CodecError::InvalidValue(format!(
                "{} samples given for a {}x{}x{} frame",
                samples.len(),
                width,
                height,
                channels
            )));
        }
        frame.samples = samples;
        Ok(frame)
    }

    pub fn high_bit(&self) -> u32 {
        self.bit_depth.saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn index(&self, x: u32, y: u32, channel: u32) -> usize {
        ((y as usize * self.width as usize + x as usize) * self.channels as usize) + channel as usize
    }

    pub fn get(&self, x: u32, y: u32, channel: u32) -> i32 {
        self.samples[self.index(x, y, channel)]
    }

    pub fn set(&mut self, x: u32, y: u32, channel: u32, value: i32) {
        let index = self.index(x, y, channel);
        self.samples[index] = value;
    }

    /// Smallest and largest value the bit depth can hold.
    pub fn value_range(&self) -> (i64, i64) {
        let depth = self.bit_depth.clamp(1, 32);
        if self.signed {
            (-(1i64 << (depth - 1)), (1i64 << (depth - 1)) - 1)
        } else {
            (0, (1i64 << depth) - 1)
        }
    }

    /// 8 bit rendering for display: samples are stretched between their
    /// minimum and maximum, MONOCHROME1 is inverted.
    pub fn to_dynamic_image(&self) -> CommonResult<DynamicImage> {
        if self.is_empty() {
            return Err(CodecError::InvalidValue("frame has no samples".into()));
        }

        let data_min = self.samples.iter().copied().min().unwrap_or(0) as f64;
        let data_max = self.samples.iter().copied().max().unwrap_or(0) as f64;
        let data_range = (data_max - data_min).max(1.0);

        let mut pixels = self
            .samples
            .iter()
            .map(|v| ((*v as f64 - data_min) / data_range) * 255.0)
            .map(|v| v.round() as u8)
            .collect::<Vec<u8>>();

        if self.color_space == "MONOCHROME1" {
            pixels = pixels.iter().map(|v| 255 - v).collect::<Vec<u8>>();
        }

        let image = match self.channels {
            1 => ImageBuffer::<Luma<u8>, _>::from_raw(self.width, self.height, pixels)
                .map(DynamicImage::ImageLuma8),
            3 => ImageBuffer::<Rgb<u8>, _>::from_raw(self.width, self.height, pixels)
                .map(DynamicImage::ImageRgb8),
            channels => {
                return Err(CodecError::InvalidValue(format!(
                    "cannot render {} channels",
                    channels
                )))
            }
        };

        image.ok_or_else(|| CodecError::InvalidValue("sample count does not match size".into()))
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> CommonResult<()> {
        self.to_dynamic_image()?
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_monochrome_stretched_to_eight_bits() {
        let frame =
            Frame::from_samples(2, 1, 1, 12, false, "MONOCHROME2", vec![100, 4095]).unwrap();
        let image = frame.to_dynamic_image().unwrap().to_luma8();

        assert_eq!(image.get_pixel(0, 0).0, [0]);
        assert_eq!(image.get_pixel(1, 0).0, [255]);
    }

    #[test]
    fn monochrome1_is_inverted() {
        let frame = Frame::from_samples(2, 1, 1, 8, false, "MONOCHROME1", vec![0, 10]).unwrap();
        let image = frame.to_dynamic_image().unwrap().to_luma8();

        assert_eq!(image.get_pixel(0, 0).0, [255]);
    }

    #[test]
    fn checks_sample_count() {
        assert!(Frame::from_samples(2, 2, 3, 8, false, "RGB", vec![0; 11]).is_err());
        let mut frame = Frame::new(2, 2, 3, 8, false, "RGB");
        frame.set(1, 1, 2, 77);
        assert_eq!(frame.get(1, 1, 2), 77);
        assert_eq!(frame.samples[11], 77);
        assert_eq!(frame.value_range(), (0, 255));
    }
}
