use byteorder::{ByteOrder, LittleEndian};

use crate::{
    codec::{FrameLayout, PixelCodec, RLE_LOSSLESS},
    config::EncodeOptions,
    frame::Frame,
    CodecError, CommonResult,
};

const HEADER_SIZE: usize = 64;
const MAX_SEGMENTS: usize = 15;
/// Shortest run emitted as a repeat command.
const MIN_RUN: usize = 4;
const MAX_PACKET: usize = 128;

/// DICOM RLE lossless: one PackBits style segment per channel and byte plane,
/// most significant plane first.
#[derive(Debug, Default, Clone, Copy)]
pub struct RleCodec;

/// Compresses one byte plane. Runs never cross a row boundary and the result
/// is padded to an even length with a no-op command.
pub fn encode_segment(bytes: &[u8], row_len: usize) -> Vec<u8> {
    let row_len = if row_len == 0 { bytes.len().max(1) } else { row_len };
    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / MAX_PACKET + 2);

    for row in bytes.chunks(row_len) {
        let mut scan = 0;
        while scan < row.len() {
            // next run long enough to be worth a repeat command
            let mut start_run = scan;
            let mut run_length = 0;
            while start_run < row.len() {
                let run_byte = row[start_run];
                let mut end = start_run + 1;
                while end < row.len() && row[end] == run_byte {
                    end += 1;
                }
                if end - start_run >= MIN_RUN {
                    run_length = end - start_run;
                    break;
                }
                start_run = end;
            }

            while scan < start_run {
                let count = (start_run - scan).min(MAX_PACKET);
                out.push((count - 1) as u8);
                out.extend_from_slice(&row[scan..scan + count]);
                scan += count;
            }

            if start_run >= row.len() {
                break;
            }

            let count = run_length.min(MAX_PACKET);
            out.push((257 - count) as u8);
            out.push(row[scan]);
            scan += count;
        }
    }

    if out.len() % 2 == 1 {
        out.push(0x80);
    }
    out
}

/// Expands commands until `expected` bytes are produced. Trailing data after
/// that point is ignored.
pub fn decode_segment(data: &[u8], expected: usize) -> CommonResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    let mut position = 0;

    while out.len() < expected {
        let command = *data.get(position).ok_or_else(|| {
            CodecError::TruncatedRleSegment(format!(
                "segment ends after {} of {} bytes",
                out.len(),
                expected
            ))
        })?;
        position += 1;

        match command {
            0x80 => continue,
            0x00..=0x7F => {
                let count = command as usize + 1;
                let literal = data.get(position..position + count).ok_or_else(|| {
                    CodecError::TruncatedRleSegment(format!(
                        "literal of {} bytes at offset {} exceeds the segment",
                        count,
                        position - 1
                    ))
                })?;
                position += count;
                let take = count.min(expected - out.len());
                out.extend_from_slice(&literal[..take]);
            }
            _ => {
                let count = 1u8.wrapping_sub(command) as usize;
                let value = *data.get(position).ok_or_else(|| {
                    CodecError::TruncatedRleSegment(format!(
                        "run at offset {} has no value byte",
                        position - 1
                    ))
                })?;
                position += 1;
                let take = count.min(expected - out.len());
                out.resize(out.len() + take, value);
            }
        }
    }

    Ok(out)
}

fn byte_planes(layout: &FrameLayout) -> u32 {
    layout.bits_allocated.div_ceil(8)
}

fn check_layout(layout: &FrameLayout) -> CommonResult<usize> {
    if layout.bits_allocated == 0 || layout.bits_allocated > 32 {
        return Err(CodecError::InvalidValue(format!(
            "{} bits allocated",
            layout.bits_allocated
        )));
    }
    if layout.color_space.ends_with("_422") || layout.color_space.ends_with("_420") {
        return Err(CodecError::InvalidValue(format!(
            "subsampled {} cannot be stored as RLE",
            layout.color_space
        )));
    }
    let segments = (layout.channels * byte_planes(layout)) as usize;
    if segments > MAX_SEGMENTS {
        return Err(CodecError::InvalidValue(format!(
            "{} RLE segments needed, at most {} allowed",
            segments, MAX_SEGMENTS
        )));
    }
    Ok(segments)
}

impl PixelCodec for RleCodec {
    fn name(&self) -> &'static str {
        "rle"
    }

    fn can_handle(&self, transfer_syntax: &str) -> bool {
        transfer_syntax == RLE_LOSSLESS
    }

    fn is_encapsulated(&self, _transfer_syntax: &str) -> bool {
        true
    }

    fn suggest_allocated_bits(&self, _transfer_syntax: &str, high_bit: u32) -> u32 {
        (high_bit + 8) & !7
    }

    /// Segments are always read plane by plane, whatever the planar
    /// configuration of the dataset says.
    fn decode(&self, data: &[u8], layout: &FrameLayout) -> CommonResult<Frame> {
        let needed = check_layout(layout)?;
        if data.len() < HEADER_SIZE {
            return Err(CodecError::TruncatedRleSegment(format!(
                "{} bytes cannot hold the segment table",
                data.len()
            )));
        }

        let mut header = [0u32; 16];
        LittleEndian::read_u32_into(&data[..HEADER_SIZE], &mut header);
        let declared = header[0] as usize;
        if declared < needed || declared > MAX_SEGMENTS {
            return Err(CodecError::CorruptedFile(format!(
                "RLE header declares {} segments, {} expected",
                declared, needed
            )));
        }

        let mask = layout.mask();
        let pixels = layout.width as usize * layout.height as usize;
        let channels = layout.channels as usize;
        let mut values = vec![0u32; pixels * channels];
        let mut segment = 0;

        for channel in 0..channels {
            let mut shift = byte_planes(layout) * 8;
            while shift > 0 {
                shift -= 8;
                let start = header[segment + 1] as usize;
                let end = if segment + 1 < declared {
                    header[segment + 2] as usize
                } else {
                    data.len()
                };
                if start < HEADER_SIZE || start > end || end > data.len() {
                    return Err(CodecError::TruncatedRleSegment(format!(
                        "segment {} spans {}..{} of {} bytes",
                        segment,
                        start,
                        end,
                        data.len()
                    )));
                }
                let plane = decode_segment(&data[start..end], pixels)?;
                for (pixel, byte) in plane.into_iter().enumerate() {
                    values[pixel * channels + channel] |= ((byte as u32) << shift) & mask;
                }
                segment += 1;
            }
        }

        let mut frame = Frame::new(
            layout.width,
            layout.height,
            layout.channels,
            layout.high_bit + 1,
            layout.signed,
            &layout.color_space,
        );
        for (sample, value) in frame.samples.iter_mut().zip(values) {
            *sample = layout.extend_sign(value);
        }
        Ok(frame)
    }

    fn encode(
        &self,
        frame: &Frame,
        layout: &FrameLayout,
        _options: &EncodeOptions,
    ) -> CommonResult<Vec<u8>> {
        let segments_count = check_layout(layout)?;
        let mask = layout.mask();
        let channels = layout.channels as usize;
        let row_len = layout.width as usize;

        let mut segments = Vec::with_capacity(segments_count);
        for channel in 0..channels {
            let mut shift = byte_planes(layout) * 8;
            while shift > 0 {
                shift -= 8;
                let plane = frame
                    .samples
                    .chunks_exact(channels)
                    .map(|pixel| ((pixel[channel] as u32 & mask) >> shift) as u8)
                    .collect::<Vec<u8>>();
                segments.push(encode_segment(&plane, row_len));
            }
        }

        let mut header = [0u32; 16];
        header[0] = segments.len() as u32;
        let mut offset = HEADER_SIZE;
        for (index, segment) in segments.iter().enumerate() {
            header[index + 1] = offset as u32;
            offset += segment.len();
        }

        let mut out = vec![0u8; HEADER_SIZE];
        LittleEndian::write_u32_into(&header, &mut out);
        for segment in segments {
            out.extend_from_slice(&segment);
        }
        tracing::trace!(bytes = out.len(), segments = header[0], "rle frame encoded");
        Ok(out)
    }
}
