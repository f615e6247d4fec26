use byteorder::{ByteOrder, LittleEndian};

use crate::{
    codec::{
        FrameLayout, PixelCodec, EXPLICIT_VR_BIG_ENDIAN, EXPLICIT_VR_LITTLE_ENDIAN,
        IMPLICIT_VR_LITTLE_ENDIAN,
    },
    config::EncodeOptions,
    frame::Frame,
    CodecError, CommonResult,
};

/// Uncompressed samples packed little endian in `bits_allocated` bit words.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

/// Reads consecutive samples of any width up to 32 bits, least significant
/// bit first, which matches little endian words for 8, 16 and 32 bits.
struct SampleReader<'a> {
    data: &'a [u8],
    bits: u32,
    position: usize,
    bit_buffer: u64,
    bit_count: u32,
}

impl<'a> SampleReader<'a> {
    fn new(data: &'a [u8], bits: u32) -> Self {
        Self {
            data,
            bits,
            position: 0,
            bit_buffer: 0,
            bit_count: 0,
        }
    }

    fn read_sample(&mut self) -> CommonResult<u32> {
        let truncated = || CodecError::CorruptedFile("pixel data is shorter than the frame".into());
        match self.bits {
            8 => {
                let value = *self.data.get(self.position).ok_or_else(truncated)?;
                self.position += 1;
                Ok(value as u32)
            }
            16 => {
                let word = self.data.get(self.position..self.position + 2).ok_or_else(truncated)?;
                self.position += 2;
                Ok(LittleEndian::read_u16(word) as u32)
            }
            32 => {
                let word = self.data.get(self.position..self.position + 4).ok_or_else(truncated)?;
                self.position += 4;
                Ok(LittleEndian::read_u32(word))
            }
            bits => {
                while self.bit_count < bits {
                    let byte = *self.data.get(self.position).ok_or_else(truncated)?;
                    self.position += 1;
                    self.bit_buffer |= (byte as u64) << self.bit_count;
                    self.bit_count += 8;
                }
                let value = (self.bit_buffer & ((1u64 << bits) - 1)) as u32;
                self.bit_buffer >>= bits;
                self.bit_count -= bits;
                Ok(value)
            }
        }
    }
}

struct SampleWriter {
    data: Vec<u8>,
    bits: u32,
    bit_buffer: u64,
    bit_count: u32,
}

impl SampleWriter {
    fn new(bits: u32, capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            bits,
            bit_buffer: 0,
            bit_count: 0,
        }
    }

    fn push(&mut self, value: u32) {
        match self.bits {
            8 => self.data.push(value as u8),
            16 => self.data.extend_from_slice(&(value as u16).to_le_bytes()),
            32 => self.data.extend_from_slice(&value.to_le_bytes()),
            bits => {
                self.bit_buffer |= ((value as u64) & ((1u64 << bits) - 1)) << self.bit_count;
                self.bit_count += bits;
                while self.bit_count >= 8 {
                    self.data.push(self.bit_buffer as u8);
                    self.bit_buffer >>= 8;
                    self.bit_count -= 8;
                }
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            self.data.push(self.bit_buffer as u8);
        }
        self.data
    }
}

fn check_layout(layout: &FrameLayout) -> CommonResult<()> {
    if layout.bits_allocated == 0 || layout.bits_allocated > 32 {
        return Err(CodecError::InvalidValue(format!(
            "{} bits allocated",
            layout.bits_allocated
        )));
    }
    if layout.color_space.ends_with("_422") || layout.color_space.ends_with("_420") {
        return Err(CodecError::InvalidValue(format!(
            "subsampled {} is not supported for uncompressed pixels",
            layout.color_space
        )));
    }
    Ok(())
}

impl PixelCodec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn can_handle(&self, transfer_syntax: &str) -> bool {
        matches!(
            transfer_syntax,
            IMPLICIT_VR_LITTLE_ENDIAN | EXPLICIT_VR_LITTLE_ENDIAN | EXPLICIT_VR_BIG_ENDIAN
        )
    }

    fn is_encapsulated(&self, _transfer_syntax: &str) -> bool {
        false
    }

    fn suggest_allocated_bits(&self, _transfer_syntax: &str, high_bit: u32) -> u32 {
        high_bit + 1
    }

    fn decode(&self, data: &[u8], layout: &FrameLayout) -> CommonResult<Frame> {
        check_layout(layout)?;
        let mask = layout.mask();
        let mut frame = Frame::new(
            layout.width,
            layout.height,
            layout.channels,
            layout.high_bit + 1,
            layout.signed,
            &layout.color_space,
        );
        let mut reader = SampleReader::new(data, layout.bits_allocated);
        let channels = layout.channels as usize;

        if layout.planar && channels > 1 {
            let pixels = layout.width as usize * layout.height as usize;
            for channel in 0..channels {
                for pixel in 0..pixels {
                    frame.samples[pixel * channels + channel] =
                        layout.extend_sign(reader.read_sample()? & mask);
                }
            }
        } else {
            for sample in frame.samples.iter_mut() {
                *sample = layout.extend_sign(reader.read_sample()? & mask);
            }
        }

        Ok(frame)
    }

    fn encode(
        &self,
        frame: &Frame,
        layout: &FrameLayout,
        _options: &EncodeOptions,
    ) -> CommonResult<Vec<u8>> {
        check_layout(layout)?;
        let mask = layout.mask();
        let mut writer = SampleWriter::new(layout.bits_allocated, layout.frame_bytes());
        let channels = layout.channels as usize;

        if layout.planar && channels > 1 {
            for channel in 0..channels {
                for pixel in frame.samples.chunks_exact(channels) {
                    writer.push(pixel[channel] as u32 & mask);
                }
            }
        } else {
            for sample in &frame.samples {
                writer.push(*sample as u32 & mask);
            }
        }

        Ok(writer.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(bits_allocated: u32, high_bit: u32, channels: u32, planar: bool) -> FrameLayout {
        FrameLayout {
            width: 3,
            height: 1,
            channels,
            bits_allocated,
            bits_stored: high_bit + 1,
            high_bit,
            signed: false,
            planar,
            color_space: if channels == 3 { "RGB" } else { "MONOCHROME2" }.into(),
            transfer_syntax: EXPLICIT_VR_LITTLE_ENDIAN.into(),
        }
    }

    #[test]
    fn reads_sixteen_bit_words_with_mask() {
        let layout = layout(16, 11, 1, false);
        let data = [0x34, 0xF2, 0xFF, 0x0F, 0x00, 0x00];
        let frame = RawCodec.decode(&data, &layout).unwrap();

        assert_eq!(frame.samples, vec![0x0234, 0x0FFF, 0]);
    }

    #[test]
    fn packed_twelve_bits_round_trip() {
        let layout = layout(12, 11, 1, false);
        let frame = Frame::from_samples(3, 1, 1, 12, false, "MONOCHROME2", vec![0xABC, 0x123, 0xFFF])
            .unwrap();
        let data = RawCodec.encode(&frame, &layout, &EncodeOptions::default()).unwrap();

        assert_eq!(data, vec![0xBC, 0x3A, 0x12, 0xFF, 0x0F]);
        assert_eq!(RawCodec.decode(&data, &layout).unwrap(), frame);
    }

    #[test]
    fn planar_rgb_round_trip() {
        let layout = layout(8, 7, 3, true);
        let frame =
            Frame::from_samples(3, 1, 3, 8, false, "RGB", vec![1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        let data = RawCodec.encode(&frame, &layout, &EncodeOptions::default()).unwrap();

        assert_eq!(data, vec![1, 4, 7, 2, 5, 8, 3, 6, 9]);
        assert_eq!(RawCodec.decode(&data, &layout).unwrap(), frame);
    }

    #[test]
    fn signed_samples_are_extended() {
        let mut layout = layout(16, 15, 1, false);
        layout.signed = true;
        let frame = RawCodec.decode(&[0xFF, 0xFF, 0x00, 0x80, 0x01, 0x00], &layout).unwrap();

        assert_eq!(frame.samples, vec![-1, -32768, 1]);
    }

    #[test]
    fn short_data_is_corrupted() {
        let layout = layout(16, 15, 1, false);
        assert!(matches!(
            RawCodec.decode(&[0, 0, 0], &layout),
            Err(CodecError::CorruptedFile(_))
        ));
    }
}
