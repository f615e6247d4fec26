//! JPEG codec for the DICOM JPEG transfer syntaxes.
//!
//! Decoding covers the baseline, extended, progressive and lossless
//! processes (SOF0 to SOF3). Encoding writes sequential scans with Huffman
//! tables optimized for the image: SOF0/SOF1 for the lossy syntaxes and
//! SOF3 with first order prediction for the lossless ones.

use std::collections::{BTreeMap, BTreeSet};

use self::{
    channel::JpegChannel,
    markers::{write_marker, EOI, SOI},
    scan::Sink,
};
use super::{
    FrameLayout, PixelCodec, JPEG_BASELINE, JPEG_EXTENDED, JPEG_LOSSLESS,
    JPEG_LOSSLESS_FIRST_ORDER,
};
use crate::{
    config::EncodeOptions,
    frame::Frame,
    huffman::{HuffmanTable, MAX_CODE_LENGTH},
    stream::{MarkerEscape, StreamReader, StreamWriter},
    CodecError, CommonResult,
};

mod channel;
mod dct;
mod markers;
mod scan;
pub mod tables;

const TABLE_SLOTS: usize = 16;

/// Photometric interpretation without its chroma subsampling suffix.
pub fn base_color_space(color_space: &str) -> &str {
    color_space
        .strip_suffix("_422")
        .or_else(|| color_space.strip_suffix("_420"))
        .unwrap_or(color_space)
}

fn is_lossless(transfer_syntax: &str) -> bool {
    matches!(transfer_syntax, JPEG_LOSSLESS | JPEG_LOSSLESS_FIRST_ORDER)
}

/// Decoder and encoder state of one JPEG image.
#[derive(Debug)]
struct JpegState {
    /// SOF index: 0 baseline, 1 extended, 2 progressive, 3 lossless.
    process: Option<u8>,
    lossless: bool,
    precision: u32,
    width: u32,
    height: u32,
    channels: BTreeMap<u8, JpegChannel>,
    scan_components: Vec<u8>,

    quant: [[u32; 64]; TABLE_SLOTS],
    dc_tables: Vec<HuffmanTable>,
    ac_tables: Vec<HuffmanTable>,

    spectral_start: u32,
    spectral_end: u32,
    bit_high: u32,
    bit_low: u32,
    eob_run: u32,

    restart_interval: u32,
    mcu_last_restart: u32,
    mcu_processed: u32,
    mcu_x: u32,
    mcu_y: u32,
    mcu_count_x: u32,
    mcu_count_y: u32,
    mcu_total: u32,

    max_sampling_x: u32,
    max_sampling_y: u32,
    /// Image size rounded up to whole MCUs.
    jpeg_width: u32,
    jpeg_height: u32,

    end_of_image: bool,
}

impl JpegState {
    fn new() -> Self {
        Self {
            process: None,
            lossless: false,
            precision: 8,
            width: 0,
            height: 0,
            channels: BTreeMap::new(),
            scan_components: Vec::new(),
            quant: [[1; 64]; TABLE_SLOTS],
            dc_tables: vec![HuffmanTable::new(8); TABLE_SLOTS],
            ac_tables: vec![HuffmanTable::new(8); TABLE_SLOTS],
            spectral_start: 0,
            spectral_end: 63,
            bit_high: 0,
            bit_low: 0,
            eob_run: 0,
            restart_interval: 0,
            mcu_last_restart: 0,
            mcu_processed: 0,
            mcu_x: 0,
            mcu_y: 0,
            mcu_count_x: 0,
            mcu_count_y: 0,
            mcu_total: 0,
            max_sampling_x: 1,
            max_sampling_y: 1,
            jpeg_width: 0,
            jpeg_height: 0,
            end_of_image: false,
        }
    }

    /// State with the Annex K tables preloaded, for streams that omit DHT or DQT.
    fn for_decoding() -> CommonResult<Self> {
        let mut state = Self::new();
        for slot in 0..TABLE_SLOTS {
            state.quant[slot] = tables::scaled_quant(slot, 300);
            if slot == 0 {
                state.dc_tables[slot]
                    .load_definition(&tables::DC_LUMINANCE_COUNTS, &tables::DC_LUMINANCE_VALUES)?;
                state.ac_tables[slot]
                    .load_definition(&tables::AC_LUMINANCE_COUNTS, &tables::AC_LUMINANCE_VALUES)?;
            } else {
                state.dc_tables[slot].load_definition(
                    &tables::DC_CHROMINANCE_COUNTS,
                    &tables::DC_CHROMINANCE_VALUES,
                )?;
                state.ac_tables[slot].load_definition(
                    &tables::AC_CHROMINANCE_COUNTS,
                    &tables::AC_CHROMINANCE_VALUES,
                )?;
            }
        }
        Ok(state)
    }

    fn for_encoding(quality: u32) -> Self {
        let mut state = Self::new();
        for slot in 0..TABLE_SLOTS {
            state.quant[slot] = tables::scaled_quant(slot, quality);
        }
        state
    }

    /// Sizes the component buffers once the frame header is known.
    fn alloc_channels(&mut self) {
        self.max_sampling_x = self.channels.values().map(|c| c.sampling_x).max().unwrap_or(1);
        self.max_sampling_y = self.channels.values().map(|c| c.sampling_y).max().unwrap_or(1);

        let (unit_x, unit_y) = if self.lossless {
            (self.max_sampling_x, self.max_sampling_y)
        } else {
            (8 * self.max_sampling_x, 8 * self.max_sampling_y)
        };
        self.jpeg_width = self.width.div_ceil(unit_x) * unit_x;
        self.jpeg_height = self.height.div_ceil(unit_y) * unit_y;

        for channel in self.channels.values_mut() {
            channel.allocate(
                self.jpeg_width * channel.sampling_x / self.max_sampling_x,
                self.jpeg_height * channel.sampling_y / self.max_sampling_y,
            );
        }
    }

    /// MCU geometry of the current scan. Also starts the scan: counters,
    /// predictors and end of band runs are reset.
    fn find_mcu_size(&mut self) {
        let in_scan = || {
            self.scan_components
                .iter()
                .filter_map(|id| self.channels.get(id))
        };
        let min_x = in_scan().map(|c| c.sampling_x).min().unwrap_or(1);
        let min_y = in_scan().map(|c| c.sampling_y).min().unwrap_or(1);

        let default_dc = if self.lossless {
            1 << (self.precision - self.bit_low - 1)
        } else {
            0
        };
        for id in &self.scan_components {
            if let Some(channel) = self.channels.get_mut(id) {
                channel.block_mcu_x = channel.sampling_x / min_x;
                channel.block_mcu_y = channel.sampling_y / min_y;
                channel.default_dc = default_dc;
                channel.restart(0);
            }
        }

        if self.lossless {
            self.mcu_count_x = self.jpeg_width * min_x / self.max_sampling_x;
            self.mcu_count_y = self.jpeg_height * min_y / self.max_sampling_y;
        } else {
            let boundary_x = 8 * self.max_sampling_x / min_x;
            let boundary_y = 8 * self.max_sampling_y / min_y;
            self.mcu_count_x = self.width.div_ceil(boundary_x);
            self.mcu_count_y = self.height.div_ceil(boundary_y);
        }
        self.mcu_total = self.mcu_count_x * self.mcu_count_y;
        self.mcu_last_restart = 0;
        self.eob_run = 0;
        self.set_mcu_position(0);
    }

    fn set_mcu_position(&mut self, processed: u32) {
        self.mcu_processed = processed;
        if self.mcu_count_x > 0 {
            self.mcu_x = processed % self.mcu_count_x;
            self.mcu_y = processed / self.mcu_count_x;
        }
    }

    /// Restarts DC prediction of the scan components at the current MCU.
    fn reset_predictors(&mut self) {
        let mcu_y = self.mcu_y;
        for id in &self.scan_components {
            if let Some(channel) = self.channels.get_mut(id) {
                channel.restart(mcu_y * channel.block_mcu_y);
            }
        }
        self.eob_run = 0;
    }

    fn next_mcu_stop(&self) -> u32 {
        if self.restart_interval == 0 {
            return self.mcu_total;
        }
        (self.mcu_last_restart + self.restart_interval).min(self.mcu_total)
    }

    fn frame_complete(&self) -> bool {
        self.process.is_some() && self.mcu_total > 0 && self.mcu_processed >= self.mcu_total
    }

    fn decode(data: &[u8]) -> CommonResult<Self> {
        if !data.starts_with(&[0xFF, SOI]) {
            return Err(CodecError::UnrecognizedFormat(
                "missing JPEG start of image marker".to_string(),
            ));
        }
        let mut state = Self::for_decoding()?;
        let mut reader = StreamReader::from_bytes(data.to_vec(), MarkerEscape::Jpeg);
        reader.skip(2)?;

        while !state.end_of_image {
            let stop = state.next_mcu_stop();
            if state.mcu_processed >= stop {
                match state.read_marker(&mut reader) {
                    Ok(()) => {}
                    Err(CodecError::UnexpectedEndOfStream) if state.frame_complete() => {
                        tracing::warn!("jpeg stream ends without EOI");
                        break;
                    }
                    Err(error) => return Err(error),
                }
                continue;
            }

            let result = state.decode_mcus(&mut reader, stop);
            reader.reset_bit_cursor();
            match result {
                Ok(()) => {}
                Err(CodecError::UnexpectedMarker(marker)) => {
                    tracing::warn!(
                        marker = format!("FF{:02X}", marker),
                        decoded = state.mcu_processed,
                        expected = stop,
                        "entropy coded segment cut short"
                    );
                    state.set_mcu_position(stop);
                }
                Err(error) => return Err(error),
            }
        }

        if state.process.is_none() {
            return Err(CodecError::CorruptedJpegStream("no frame header".to_string()));
        }
        if state.mcu_total == 0 {
            return Err(CodecError::CorruptedJpegStream("no scan".to_string()));
        }
        state.finish();
        Ok(state)
    }

    /// Turns the accumulated coefficients into samples.
    fn finish(&mut self) {
        if self.lossless {
            return;
        }
        for channel in self.channels.values_mut() {
            let factors = dct::decompression_factors(&self.quant[channel.quant_table]);
            for block in channel.buffer.chunks_exact_mut(64) {
                if let Ok(block) = <&mut [i32; 64]>::try_from(block) {
                    dct::idct(block, &factors);
                }
            }
        }
    }

    /// Upsamples and crops the components into an interleaved frame.
    fn to_frame(&self, layout: &FrameLayout) -> CommonResult<Frame> {
        let channel_count = self.channels.len() as u32;
        if channel_count != layout.channels {
            tracing::warn!(
                stream = channel_count,
                dataset = layout.channels,
                "jpeg component count differs from samples per pixel"
            );
        }

        let precision = self.precision;
        let offset = 1i32 << (precision - 1);
        let (min, max) = if layout.signed {
            (-offset, offset - 1)
        } else {
            (0, (1i32 << precision) - 1)
        };
        let point_transform = if self.lossless { self.bit_low } else { 0 };

        let mut frame = Frame::new(
            self.width,
            self.height,
            channel_count,
            layout.high_bit + 1,
            layout.signed,
            base_color_space(&layout.color_space),
        );
        for (index, channel) in self.channels.values().enumerate() {
            for y in 0..self.height {
                let source_y = y * channel.sampling_y / self.max_sampling_y;
                for x in 0..self.width {
                    let source_x = x * channel.sampling_x / self.max_sampling_x;
                    let mut value = channel.sample(source_x, source_y, self.lossless);
                    if self.lossless {
                        value <<= point_transform;
                        if layout.signed && value & offset != 0 {
                            value -= 1 << precision;
                        }
                    } else if !layout.signed {
                        value += offset;
                    }
                    frame.set(x, y, index as u32, value.clamp(min, max));
                }
            }
        }
        Ok(frame)
    }

    /// Fills the component buffers from `frame`, averaging subsampled
    /// components and replicating edges into the padding.
    fn load_samples(&mut self, frame: &Frame, signed: bool) {
        let precision = self.precision;
        let offset = 1i32 << (precision - 1);
        let (min, max) = if signed {
            (-offset, offset - 1)
        } else {
            (0, (1i32 << precision) - 1)
        };
        let mask = (1i32 << precision) - 1;
        let lossless = self.lossless;

        for (index, channel) in self.channels.values_mut().enumerate() {
            let run_x = (self.max_sampling_x / channel.sampling_x).max(1);
            let run_y = (self.max_sampling_y / channel.sampling_y).max(1);
            for cy in 0..channel.size_y {
                for cx in 0..channel.size_x {
                    let mut total = 0i64;
                    for dy in 0..run_y {
                        let y = (cy * run_y + dy).min(frame.height - 1);
                        for dx in 0..run_x {
                            let x = (cx * run_x + dx).min(frame.width - 1);
                            total += frame.get(x, y, index as u32) as i64;
                        }
                    }
                    let count = (run_x * run_y) as f64;
                    let mut value = ((total as f64 / count).round() as i32).clamp(min, max);
                    if lossless {
                        value &= mask;
                    } else if !signed {
                        value -= offset;
                    }
                    channel.set_sample(cx, cy, lossless, value);
                }
            }
        }
    }

    fn forward_transform(&mut self) {
        for channel in self.channels.values_mut() {
            let factors = dct::compression_factors(&self.quant[channel.quant_table]);
            for block in channel.buffer.chunks_exact_mut(64) {
                if let Ok(block) = <&mut [i32; 64]>::try_from(block) {
                    dct::fdct(block, &factors);
                }
            }
        }
    }

    /// Builds optimized codes from the frequencies of the counting pass.
    fn build_huffman_tables(&mut self) -> CommonResult<()> {
        let dc_slots = self.channels.values().map(|c| c.dc_table).collect::<BTreeSet<_>>();
        let ac_slots = if self.lossless {
            BTreeSet::new()
        } else {
            self.channels.values().map(|c| c.ac_table).collect::<BTreeSet<_>>()
        };

        for slot in dc_slots {
            optimize(&mut self.dc_tables[slot])?;
        }
        for slot in ac_slots {
            optimize(&mut self.ac_tables[slot])?;
        }
        Ok(())
    }

    fn encode(
        frame: &Frame,
        layout: &FrameLayout,
        options: &EncodeOptions,
        restart_interval: u32,
    ) -> CommonResult<Vec<u8>> {
        let transfer_syntax = layout.transfer_syntax.as_str();
        let lossless = is_lossless(transfer_syntax);
        let max_high_bit = match transfer_syntax {
            JPEG_BASELINE => 7,
            JPEG_EXTENDED => 11,
            _ => 15,
        };
        if layout.high_bit > max_high_bit {
            return Err(CodecError::InvalidValue(format!(
                "high bit {} exceeds {} for transfer syntax {}",
                layout.high_bit, max_high_bit, transfer_syntax
            )));
        }
        if frame.width == 0
            || frame.height == 0
            || frame.width > u16::MAX as u32
            || frame.height > u16::MAX as u32
        {
            return Err(CodecError::InvalidValue(format!(
                "{}x{} frame cannot be stored as JPEG",
                frame.width, frame.height
            )));
        }
        if frame.channels == 0 || frame.channels > u8::MAX as u32 {
            return Err(CodecError::InvalidValue(format!(
                "{} channels cannot be stored as JPEG",
                frame.channels
            )));
        }

        let precision = if lossless {
            (layout.high_bit + 1).clamp(2, 16)
        } else if layout.high_bit < 8 {
            8
        } else {
            12
        };
        let subsample_y = !lossless && layout.color_space.ends_with("_420");
        let subsample_x = subsample_y || (!lossless && layout.color_space.ends_with("_422"));
        let chroma = matches!(
            base_color_space(&layout.color_space),
            "YBR_FULL" | "YBR_PARTIAL"
        );

        let mut state = Self::for_encoding(options.quality.value());
        state.lossless = lossless;
        state.precision = precision;
        state.width = frame.width;
        state.height = frame.height;
        state.restart_interval = restart_interval;
        state.process = Some(match (lossless, precision > 8) {
            (true, _) => 3,
            (false, true) => 1,
            (false, false) => 0,
        });
        for component in 0..frame.channels {
            let mut channel = JpegChannel::new(1, 1, 0);
            if component == 0 {
                channel.sampling_x += subsample_x as u32;
                channel.sampling_y += subsample_y as u32;
            } else if chroma {
                channel.quant_table = 1;
                channel.dc_table = 1;
                channel.ac_table = 1;
            }
            state.channels.insert(component as u8, channel);
        }
        state.alloc_channels();
        state.load_samples(frame, layout.signed);
        if lossless {
            // first order prediction, no point transform
            state.spectral_start = 1;
            state.spectral_end = 0;
        } else {
            state.forward_transform();
            state.spectral_start = 0;
            state.spectral_end = 63;
        }

        let ids = state.channels.keys().copied().collect::<Vec<u8>>();
        let scans = if options.planar {
            ids.iter().map(|id| vec![*id]).collect::<Vec<_>>()
        } else {
            vec![ids]
        };

        for scan in &scans {
            state.scan_components = scan.clone();
            state.encode_scan(&mut Sink::<Vec<u8>>::counting())?;
        }
        state.build_huffman_tables()?;

        let mut writer = StreamWriter::new(Vec::new(), MarkerEscape::Jpeg);
        write_marker(&mut writer, SOI)?;
        state.write_sof(&mut writer)?;
        if !lossless {
            state.write_dqt(&mut writer)?;
        }
        state.write_dht(&mut writer)?;
        if restart_interval > 0 {
            state.write_dri(&mut writer)?;
        }
        for scan in scans {
            state.scan_components = scan;
            state.write_sos(&mut writer)?;
            state.encode_scan(&mut Sink::writing(&mut writer))?;
        }
        write_marker(&mut writer, EOI)?;
        writer.flush()?;

        let encoded = writer.into_inner();
        tracing::debug!(
            process = ?state.process,
            precision,
            bytes = encoded.len(),
            "jpeg frame encoded"
        );
        Ok(encoded)
    }
}

/// Gives every counted symbol a code, keeping the all ones code unused.
fn optimize(table: &mut HuffmanTable) -> CommonResult<()> {
    table.inc_value_freq(0x100);
    table.build_code_lengths(MAX_CODE_LENGTH);
    table.remove_last_code();
    table.build_tables()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl PixelCodec for JpegCodec {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn can_handle(&self, transfer_syntax: &str) -> bool {
        matches!(
            transfer_syntax,
            JPEG_BASELINE | JPEG_EXTENDED | JPEG_LOSSLESS | JPEG_LOSSLESS_FIRST_ORDER
        )
    }

    fn is_encapsulated(&self, _transfer_syntax: &str) -> bool {
        true
    }

    fn suggest_allocated_bits(&self, transfer_syntax: &str, high_bit: u32) -> u32 {
        match transfer_syntax {
            JPEG_BASELINE => 8,
            JPEG_EXTENDED => 16,
            _ => (high_bit + 8) & !7,
        }
    }

    fn decode(&self, data: &[u8], layout: &FrameLayout) -> CommonResult<Frame> {
        JpegState::decode(data)?.to_frame(layout)
    }

    fn encode(
        &self,
        frame: &Frame,
        layout: &FrameLayout,
        options: &EncodeOptions,
    ) -> CommonResult<Vec<u8>> {
        JpegState::encode(frame, layout, options, 0)
    }

    fn encoded_color_space(
        &self,
        transfer_syntax: &str,
        color_space: &str,
        options: &EncodeOptions,
    ) -> String {
        let lossy = matches!(transfer_syntax, JPEG_BASELINE | JPEG_EXTENDED);
        if !lossy
            || !matches!(color_space, "YBR_FULL" | "YBR_PARTIAL")
            || !options.quality.subsample_horizontal()
        {
            return color_space.to_string();
        }
        if options.quality.subsample_vertical() {
            format!("{}_420", color_space)
        } else {
            format!("{}_422", color_space)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quality;

    fn layout_for(transfer_syntax: &str, frame: &Frame, color_space: &str) -> FrameLayout {
        FrameLayout {
            width: frame.width,
            height: frame.height,
            channels: frame.channels,
            bits_allocated: if frame.bit_depth > 8 { 16 } else { 8 },
            bits_stored: frame.bit_depth,
            high_bit: frame.bit_depth - 1,
            signed: frame.signed,
            planar: false,
            color_space: color_space.to_string(),
            transfer_syntax: transfer_syntax.to_string(),
        }
    }

    fn pattern(width: u32, height: u32, channels: u32, depth: u32, signed: bool) -> Frame {
        let color = if channels == 3 { "RGB" } else { "MONOCHROME2" };
        let mut frame = Frame::new(width, height, channels, depth, signed, color);
        let (min, max) = frame.value_range();
        let span = max - min + 1;
        let mut seed: u64 = 0x9E37_79B9;
        for value in frame.samples.iter_mut() {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            *value = (min + (seed >> 33) as i64 % span) as i32;
        }
        frame
    }

    fn gradient(width: u32, height: u32, depth: u32) -> Frame {
        let mut frame = Frame::new(width, height, 1, depth, false, "MONOCHROME2");
        let max = (1i64 << depth) - 1;
        for y in 0..height {
            for x in 0..width {
                let value = (x + y) as i64 * max / (width + height - 2) as i64;
                frame.set(x, y, 0, value as i32);
            }
        }
        frame
    }

    fn round_trip(frame: &Frame, layout: &FrameLayout, options: &EncodeOptions) -> Frame {
        let codec = JpegCodec;
        let encoded = codec.encode(frame, layout, options).unwrap();
        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);
        assert_eq!(&encoded[encoded.len() - 2..], &[0xFF, 0xD9]);
        codec.decode(&encoded, layout).unwrap()
    }

    fn max_error(a: &Frame, b: &Frame) -> i32 {
        a.samples
            .iter()
            .zip(b.samples.iter())
            .map(|(x, y)| (x - y).abs())
            .max()
            .unwrap_or(0)
    }

    fn find(bytes: &[u8], from: usize, marker: u8) -> usize {
        (from..bytes.len() - 1)
            .find(|index| bytes[*index] == 0xFF && bytes[*index + 1] == marker)
            .unwrap()
    }

    #[test]
    fn lossless_tiny_frame_is_exact() {
        let frame = Frame::from_samples(2, 2, 1, 8, false, "MONOCHROME2", vec![0, 255, 128, 64]).unwrap();
        let layout = layout_for(JPEG_LOSSLESS_FIRST_ORDER, &frame, "MONOCHROME2");
        let decoded = round_trip(&frame, &layout, &EncodeOptions::new(JPEG_LOSSLESS_FIRST_ORDER));
        assert_eq!(decoded, frame);
    }

    #[test]
    fn lossless_is_exact_for_every_depth() {
        for (depth, signed) in [(2, false), (8, true), (12, false), (12, true), (16, false), (16, true)] {
            let frame = pattern(7, 5, 1, depth, signed);
            let layout = layout_for(JPEG_LOSSLESS, &frame, "MONOCHROME2");
            let decoded = round_trip(&frame, &layout, &EncodeOptions::new(JPEG_LOSSLESS));
            assert_eq!(decoded.samples, frame.samples, "depth {} signed {}", depth, signed);
        }
    }

    #[test]
    fn lossless_color_interleaved_and_planar() {
        let frame = pattern(5, 3, 3, 8, false);
        let layout = layout_for(JPEG_LOSSLESS_FIRST_ORDER, &frame, "RGB");
        for planar in [false, true] {
            let options = EncodeOptions::new(JPEG_LOSSLESS_FIRST_ORDER).with_planar(planar);
            let encoded = JpegCodec.encode(&frame, &layout, &options).unwrap();
            let scans = (0..encoded.len() - 1)
                .filter(|i| encoded[*i] == 0xFF && encoded[*i + 1] == markers::SOS)
                .count();
            assert_eq!(scans, if planar { 3 } else { 1 });
            assert_eq!(JpegCodec.decode(&encoded, &layout).unwrap(), frame);
        }
    }

    #[test]
    fn baseline_stays_close_at_high_quality() {
        let frame = gradient(16, 16, 8);
        let layout = layout_for(JPEG_BASELINE, &frame, "MONOCHROME2");
        let options = EncodeOptions::new(JPEG_BASELINE).with_quality(Quality::VeryHigh);
        let decoded = round_trip(&frame, &layout, &options);
        assert!(max_error(&frame, &decoded) <= 2);
    }

    #[test]
    fn baseline_odd_sizes_are_cropped() {
        let frame = gradient(13, 9, 8);
        let layout = layout_for(JPEG_BASELINE, &frame, "MONOCHROME2");
        let decoded = round_trip(&frame, &layout, &EncodeOptions::new(JPEG_BASELINE));
        assert_eq!((decoded.width, decoded.height), (13, 9));
        assert!(max_error(&frame, &decoded) <= 16);
    }

    #[test]
    fn extended_carries_twelve_bits() {
        let frame = gradient(12, 10, 12);
        let layout = layout_for(JPEG_EXTENDED, &frame, "MONOCHROME2");
        let options = EncodeOptions::new(JPEG_EXTENDED).with_quality(Quality::VeryHigh);
        let encoded = JpegCodec.encode(&frame, &layout, &options).unwrap();
        assert_eq!(&encoded[2..4], &[0xFF, markers::SOF1]);

        let decoded = JpegCodec.decode(&encoded, &layout).unwrap();
        assert!(max_error(&frame, &decoded) <= 4);
    }

    #[test]
    fn chroma_subsampling_follows_the_color_space() {
        let mut frame = Frame::new(16, 16, 3, 8, false, "YBR_FULL");
        for pixel in frame.samples.chunks_exact_mut(3) {
            pixel.copy_from_slice(&[100, 120, 140]);
        }
        let layout = layout_for(JPEG_BASELINE, &frame, "YBR_FULL_422");
        let encoded = JpegCodec
            .encode(&frame, &layout, &EncodeOptions::new(JPEG_BASELINE))
            .unwrap();
        let sof = find(&encoded, 2, markers::SOF0);
        assert_eq!(encoded[sof + 11], 0x21);
        assert_eq!(encoded[sof + 14], 0x11);

        let decoded = JpegCodec.decode(&encoded, &layout).unwrap();
        assert_eq!(decoded.color_space, "YBR_FULL");
        assert!(max_error(&frame, &decoded) <= 2);
    }

    #[test]
    fn subsampled_color_space_depends_on_quality() {
        let codec = JpegCodec;
        let options = |quality| EncodeOptions::new(JPEG_BASELINE).with_quality(quality);
        assert_eq!(
            codec.encoded_color_space(JPEG_BASELINE, "YBR_FULL", &options(Quality::High)),
            "YBR_FULL"
        );
        assert_eq!(
            codec.encoded_color_space(JPEG_BASELINE, "YBR_FULL", &options(Quality::Medium)),
            "YBR_FULL_422"
        );
        assert_eq!(
            codec.encoded_color_space(JPEG_BASELINE, "YBR_PARTIAL", &options(Quality::Low)),
            "YBR_PARTIAL_420"
        );
        assert_eq!(
            codec.encoded_color_space(JPEG_LOSSLESS, "YBR_FULL", &options(Quality::Low)),
            "YBR_FULL"
        );
        assert_eq!(
            codec.encoded_color_space(JPEG_BASELINE, "RGB", &options(Quality::Low)),
            "RGB"
        );
    }

    #[test]
    fn restart_intervals_decode_like_plain_scans() {
        let frame = gradient(32, 16, 8);
        let layout = layout_for(JPEG_BASELINE, &frame, "MONOCHROME2");
        let options = EncodeOptions::new(JPEG_BASELINE);
        let plain = JpegCodec.decode(&JpegCodec.encode(&frame, &layout, &options).unwrap(), &layout).unwrap();

        let restarted = JpegState::encode(&frame, &layout, &options, 3).unwrap();
        find(&restarted, 2, markers::DRI);
        find(&restarted, 2, markers::RST0);
        assert_eq!(JpegCodec.decode(&restarted, &layout).unwrap(), plain);

        let lossless = pattern(9, 7, 1, 12, false);
        let layout = layout_for(JPEG_LOSSLESS, &lossless, "MONOCHROME2");
        let encoded = JpegState::encode(&lossless, &layout, &EncodeOptions::new(JPEG_LOSSLESS), 4).unwrap();
        assert_eq!(JpegCodec.decode(&encoded, &layout).unwrap(), lossless);
    }

    #[test]
    fn lost_interval_is_skipped_on_restart() {
        let frame = pattern(32, 8, 1, 8, false);
        let layout = layout_for(JPEG_BASELINE, &frame, "MONOCHROME2");
        let mut encoded = JpegState::encode(&frame, &layout, &EncodeOptions::new(JPEG_BASELINE), 1).unwrap();
        let intact = JpegCodec.decode(&encoded, &layout).unwrap();

        let sos = find(&encoded, 2, markers::SOS);
        let data_start = sos + 2 + u16::from_be_bytes([encoded[sos + 2], encoded[sos + 3]]) as usize;
        let first_restart = find(&encoded, data_start, markers::RST0);
        encoded.drain(data_start..first_restart + 2);

        let damaged = JpegCodec.decode(&encoded, &layout).unwrap();
        for y in 0..8 {
            for x in 16..32 {
                assert_eq!(damaged.get(x, y, 0), intact.get(x, y, 0));
            }
        }
    }

    #[test]
    fn rejects_foreign_and_unsupported_streams() {
        let layout = layout_for(JPEG_BASELINE, &Frame::new(1, 1, 1, 8, false, "MONOCHROME2"), "MONOCHROME2");

        let error = JpegCodec.decode(&[0x89, b'P', b'N', b'G'], &layout).unwrap_err();
        assert!(error.is_unrecognized_format());

        let error = JpegCodec
            .decode(&[0xFF, 0xD8, 0xFF, 0xC5, 0x00, 0x0B, 8, 0, 1, 0, 1, 1, 1, 0x11, 0], &layout)
            .unwrap_err();
        assert!(matches!(error, CodecError::UnsupportedSof(5)));
    }

    #[test]
    fn truncated_entropy_data_is_corruption() {
        let frame = pattern(16, 16, 1, 8, false);
        let layout = layout_for(JPEG_LOSSLESS, &frame, "MONOCHROME2");
        let encoded = JpegCodec.encode(&frame, &layout, &EncodeOptions::new(JPEG_LOSSLESS)).unwrap();

        let error = JpegCodec.decode(&encoded[..encoded.len() - 40], &layout).unwrap_err();
        assert!(error.is_corruption(), "{:?}", error);
    }

    #[test]
    fn high_bit_must_fit_the_process() {
        let frame = gradient(8, 8, 12);
        let layout = layout_for(JPEG_BASELINE, &frame, "MONOCHROME2");
        assert!(matches!(
            JpegCodec.encode(&frame, &layout, &EncodeOptions::new(JPEG_BASELINE)),
            Err(CodecError::InvalidValue(_))
        ));
    }

    #[test]
    fn allocated_bits_per_syntax() {
        assert_eq!(JpegCodec.suggest_allocated_bits(JPEG_BASELINE, 7), 8);
        assert_eq!(JpegCodec.suggest_allocated_bits(JPEG_EXTENDED, 11), 16);
        assert_eq!(JpegCodec.suggest_allocated_bits(JPEG_LOSSLESS, 11), 16);
        assert_eq!(JpegCodec.suggest_allocated_bits(JPEG_LOSSLESS, 6), 8);
    }
}
