use std::io::Write;

use super::{channel::JpegChannel, tables::ZIGZAG, JpegState, TABLE_SLOTS};
use crate::{
    stream::{Endian, StreamReader, StreamWriter},
    CodecError, CommonResult,
};

pub const SOF0: u8 = 0xC0;
pub const SOF1: u8 = 0xC1;
pub const SOF2: u8 = 0xC2;
pub const SOF3: u8 = 0xC3;
pub const DHT: u8 = 0xC4;
pub const RST0: u8 = 0xD0;
pub const RST7: u8 = 0xD7;
pub const SOI: u8 = 0xD8;
pub const EOI: u8 = 0xD9;
pub const SOS: u8 = 0xDA;
pub const DQT: u8 = 0xDB;
pub const DRI: u8 = 0xDD;
pub const TEM: u8 = 0x01;

fn corrupted(segment: &str, detail: impl std::fmt::Display) -> CodecError {
    CodecError::CorruptedJpegStream(format!("{} segment: {}", segment, detail))
}

/// Payload length of a marker segment, without the length field itself.
fn read_length(reader: &mut StreamReader) -> CommonResult<u64> {
    let length = reader.read_u16(Endian::Big)?;
    Ok(length.saturating_sub(2) as u64)
}

fn write_length<W: Write>(writer: &mut StreamWriter<W>, payload: usize) -> CommonResult<()> {
    let length = u16::try_from(payload + 2)
        .map_err(|_| CodecError::InvalidValue(format!("{} byte marker segment", payload)))?;
    writer.write_u16(length, Endian::Big)
}

pub fn write_marker<W: Write>(writer: &mut StreamWriter<W>, marker: u8) -> CommonResult<()> {
    writer.write(&[0xFF, marker])
}

impl JpegState {
    /// Reads up to the next marker and processes its segment. Bytes before
    /// the marker are skipped.
    pub(super) fn read_marker(&mut self, reader: &mut StreamReader) -> CommonResult<()> {
        if reader.read_u8()? != 0xFF {
            return Ok(());
        }
        let mut marker = 0xFF;
        while marker == 0xFF {
            marker = reader.read_u8()?;
        }
        tracing::trace!(marker = format!("FF{:02X}", marker), "jpeg marker");

        match marker {
            0x00 | SOI | TEM => Ok(()),
            SOF0..=SOF3 => self.read_sof(reader, marker),
            0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => Err(CodecError::UnsupportedSof(marker - SOF0)),
            DHT => self.read_dht(reader),
            DQT => self.read_dqt(reader),
            SOS => self.read_sos(reader),
            DRI => self.read_dri(reader),
            RST0..=RST7 => {
                self.restart(marker);
                Ok(())
            }
            EOI => {
                self.end_of_image = true;
                Ok(())
            }
            _ => {
                let length = read_length(reader)?;
                reader.skip(length)
            }
        }
    }

    fn read_sof(&mut self, reader: &mut StreamReader, marker: u8) -> CommonResult<()> {
        let length = read_length(reader)?;
        if length < 6 {
            return Err(corrupted("SOF", format!("length {}", length)));
        }
        let mut segment = reader.sub_window(reader.position(), length, reader.escape());
        reader.skip(length)?;

        let precision = segment.read_u8()? as u32;
        let height = segment.read_u16(Endian::Big)? as u32;
        let width = segment.read_u16(Endian::Big)? as u32;
        let components = segment.read_u8()?;
        if !(2..=16).contains(&precision) {
            return Err(corrupted("SOF", format!("precision {}", precision)));
        }
        if width == 0 || height == 0 {
            return Err(corrupted("SOF", format!("image size {}x{}", width, height)));
        }
        if length < 6 + 3 * components as u64 {
            return Err(corrupted("SOF", format!("{} components in {} bytes", components, length)));
        }

        self.channels.clear();
        for _ in 0..components {
            let id = segment.read_u8()?;
            let sampling = segment.read_u8()?;
            let quant_table = segment.read_u8()? as usize;
            let (sampling_x, sampling_y) = ((sampling >> 4) as u32, (sampling & 0x0F) as u32);
            if !(1..=4).contains(&sampling_x) || !(1..=4).contains(&sampling_y) {
                return Err(corrupted("SOF", format!("sampling factors {}x{}", sampling_x, sampling_y)));
            }
            if quant_table >= TABLE_SLOTS {
                return Err(corrupted("SOF", format!("quantization table {}", quant_table)));
            }
            self.channels
                .insert(id, JpegChannel::new(sampling_x, sampling_y, quant_table));
        }

        self.process = Some(marker - SOF0);
        self.lossless = marker == SOF3;
        self.precision = precision;
        self.width = width;
        self.height = height;
        tracing::debug!(
            process = marker - SOF0,
            precision,
            width,
            height,
            components,
            "jpeg frame header"
        );
        self.alloc_channels();
        Ok(())
    }

    fn read_dht(&mut self, reader: &mut StreamReader) -> CommonResult<()> {
        let mut remaining = read_length(reader)?;
        while remaining > 0 {
            let id = reader.read_u8()?;
            let mut counts = [0u8; 16];
            reader.read(&mut counts)?;
            let total: u64 = counts.iter().map(|count| *count as u64).sum();
            if 17 + total > remaining {
                return Err(corrupted("DHT", format!("{} codes overflow the segment", total)));
            }
            let values = reader.read_vec(total as usize)?;
            remaining -= 17 + total;

            let slot = (id & 0x0F) as usize;
            let table = if id >> 4 == 0 {
                &mut self.dc_tables[slot]
            } else {
                &mut self.ac_tables[slot]
            };
            table.load_definition(&counts, &values)?;
        }
        Ok(())
    }

    fn read_dqt(&mut self, reader: &mut StreamReader) -> CommonResult<()> {
        let mut remaining = read_length(reader)?;
        while remaining > 0 {
            let definition = reader.read_u8()?;
            let wide = definition >> 4 != 0;
            let slot = (definition & 0x0F) as usize;
            let needed = if wide { 128 } else { 64 };
            if 1 + needed > remaining {
                return Err(corrupted("DQT", "table overflows the segment"));
            }
            for position in ZIGZAG {
                self.quant[slot][position] = if wide {
                    reader.read_u16(Endian::Big)? as u32
                } else {
                    reader.read_u8()? as u32
                };
            }
            remaining -= 1 + needed;
        }
        Ok(())
    }

    fn read_sos(&mut self, reader: &mut StreamReader) -> CommonResult<()> {
        let length = read_length(reader)?;
        let mut segment = reader.sub_window(reader.position(), length, reader.escape());
        reader.skip(length)?;

        let components = segment.read_u8()?;
        if length < 4 + 2 * components as u64 {
            return Err(corrupted("SOS", format!("{} components in {} bytes", components, length)));
        }
        self.scan_components.clear();
        for _ in 0..components {
            let id = segment.read_u8()?;
            let tables = segment.read_u8()?;
            let channel = self
                .channels
                .get_mut(&id)
                .ok_or_else(|| corrupted("SOS", format!("unknown component {}", id)))?;
            channel.dc_table = (tables >> 4) as usize;
            channel.ac_table = (tables & 0x0F) as usize;
            self.scan_components.push(id);
        }

        self.spectral_start = segment.read_u8()? as u32;
        self.spectral_end = segment.read_u8()? as u32;
        let approximation = segment.read_u8()?;
        self.bit_high = (approximation >> 4) as u32;
        self.bit_low = (approximation & 0x0F) as u32;
        self.eob_run = 0;

        if self.lossless {
            if self.spectral_start > 7 || self.bit_low >= self.precision {
                return Err(corrupted(
                    "SOS",
                    format!("predictor {} point transform {}", self.spectral_start, self.bit_low),
                ));
            }
        } else if self.spectral_end > 63 || self.spectral_start > self.spectral_end {
            return Err(corrupted(
                "SOS",
                format!("spectral selection {}..{}", self.spectral_start, self.spectral_end),
            ));
        }
        if self.scan_components.is_empty() {
            return Err(corrupted("SOS", "no components"));
        }

        tracing::trace!(
            components = ?self.scan_components,
            start = self.spectral_start,
            end = self.spectral_end,
            high = self.bit_high,
            low = self.bit_low,
            "jpeg scan"
        );
        self.find_mcu_size();
        Ok(())
    }

    fn read_dri(&mut self, reader: &mut StreamReader) -> CommonResult<()> {
        let length = read_length(reader)?;
        if length < 2 {
            return Err(corrupted("DRI", format!("length {}", length)));
        }
        self.restart_interval = reader.read_u16(Endian::Big)? as u32;
        reader.skip(length - 2)
    }

    /// Resynchronizes on RSTn. The marker index tells which interval ends
    /// here, so intervals lost to corruption are skipped.
    fn restart(&mut self, marker: u8) {
        let interval = self.restart_interval as i64;
        if interval > 0 && self.mcu_count_x > 0 {
            let processed = self.mcu_processed as i64;
            let mut done = (processed + interval - 1) / interval - 1;
            let done_id = done & 7;
            let found_id = (marker & 7) as i64;
            if found_id < done_id {
                done += 8;
            }
            done = done - done_id + found_id;

            let restarted = ((done + 1) * interval).clamp(0, self.mcu_total as i64) as u32;
            if restarted != self.mcu_processed {
                tracing::warn!(
                    expected = self.mcu_processed,
                    resumed = restarted,
                    "restart marker out of sequence"
                );
            }
            self.set_mcu_position(restarted);
            self.mcu_last_restart = restarted;
        }

        self.reset_predictors();
    }

    pub(super) fn write_sof<W: Write>(&self, writer: &mut StreamWriter<W>) -> CommonResult<()> {
        let marker = match self.process {
            Some(process) => SOF0 + process,
            None => SOF0,
        };
        write_marker(writer, marker)?;
        write_length(writer, 6 + 3 * self.channels.len())?;
        writer.write_u8(self.precision as u8)?;
        writer.write_u16(self.height as u16, Endian::Big)?;
        writer.write_u16(self.width as u16, Endian::Big)?;
        writer.write_u8(self.channels.len() as u8)?;
        for (id, channel) in &self.channels {
            writer.write(&[
                *id,
                ((channel.sampling_x as u8) << 4) | channel.sampling_y as u8,
                channel.quant_table as u8,
            ])?;
        }
        Ok(())
    }

    fn used_slots(&self, select: impl Fn(&JpegChannel) -> usize) -> Vec<usize> {
        let mut slots = self.channels.values().map(select).collect::<Vec<usize>>();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    pub(super) fn write_dqt<W: Write>(&self, writer: &mut StreamWriter<W>) -> CommonResult<()> {
        let slots = self.used_slots(|channel| channel.quant_table);
        let wide = |slot: usize| self.precision > 8 || self.quant[slot].iter().any(|q| *q > 255);
        let payload: usize = slots
            .iter()
            .map(|slot| if wide(*slot) { 129 } else { 65 })
            .sum();

        write_marker(writer, DQT)?;
        write_length(writer, payload)?;
        for slot in slots {
            let wide = wide(slot);
            writer.write_u8(((wide as u8) << 4) | slot as u8)?;
            for position in ZIGZAG {
                let value = self.quant[slot][position];
                if wide {
                    writer.write_u16(value as u16, Endian::Big)?;
                } else {
                    writer.write_u8(value as u8)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn write_dht<W: Write>(&self, writer: &mut StreamWriter<W>) -> CommonResult<()> {
        let mut tables = self
            .used_slots(|channel| channel.dc_table)
            .into_iter()
            .map(|slot| (slot as u8, &self.dc_tables[slot]))
            .collect::<Vec<_>>();
        if !self.lossless {
            tables.extend(
                self.used_slots(|channel| channel.ac_table)
                    .into_iter()
                    .map(|slot| (0x10 | slot as u8, &self.ac_tables[slot])),
            );
        }
        let payload: usize = tables
            .iter()
            .map(|(_, table)| 17 + table.coded_values().len())
            .sum();

        write_marker(writer, DHT)?;
        write_length(writer, payload)?;
        for (id, table) in tables {
            writer.write_u8(id)?;
            writer.write(&table.code_counts())?;
            let values = table
                .coded_values()
                .iter()
                .map(|value| *value as u8)
                .collect::<Vec<u8>>();
            writer.write(&values)?;
        }
        Ok(())
    }

    pub(super) fn write_dri<W: Write>(&self, writer: &mut StreamWriter<W>) -> CommonResult<()> {
        write_marker(writer, DRI)?;
        write_length(writer, 2)?;
        writer.write_u16(self.restart_interval as u16, Endian::Big)
    }

    pub(super) fn write_sos<W: Write>(&self, writer: &mut StreamWriter<W>) -> CommonResult<()> {
        write_marker(writer, SOS)?;
        write_length(writer, 4 + 2 * self.scan_components.len())?;
        writer.write_u8(self.scan_components.len() as u8)?;
        for id in &self.scan_components {
            let channel = self
                .channels
                .get(id)
                .ok_or_else(|| CodecError::InvalidValue(format!("no jpeg component {}", id)))?;
            writer.write(&[*id, ((channel.dc_table as u8) << 4) | channel.ac_table as u8])?;
        }
        writer.write(&[
            self.spectral_start as u8,
            self.spectral_end as u8,
            ((self.bit_high as u8) << 4) | self.bit_low as u8,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MarkerEscape;

    fn reader(bytes: &[u8]) -> StreamReader {
        StreamReader::from_bytes(bytes.to_vec(), MarkerEscape::Jpeg)
    }

    #[test]
    fn frame_header_allocates_channels() {
        let mut state = JpegState::for_decoding().unwrap();
        let mut input = reader(&[
            0xFF, SOF1, 0x00, 0x11, 12, 0x00, 0x10, 0x00, 0x18, 3, 1, 0x22, 0, 2, 0x11, 1, 3,
            0x11, 1,
        ]);
        state.read_marker(&mut input).unwrap();

        assert_eq!(state.process, Some(1));
        assert_eq!((state.width, state.height, state.precision), (24, 16, 12));
        assert_eq!(state.channels.len(), 3);
        assert_eq!(state.channels[&1].size_x, 32);
        assert_eq!(state.channels[&2].size_x, 16);
        assert_eq!(state.channels[&2].size_y, 8);
    }

    #[test]
    fn unsupported_processes_are_reported() {
        let mut state = JpegState::for_decoding().unwrap();
        let result = state.read_marker(&mut reader(&[0xFF, 0xC9, 0x00, 0x02]));
        assert!(matches!(result, Err(CodecError::UnsupportedSof(9))));
    }

    #[test]
    fn quantization_tables_are_dezigzagged() {
        let mut bytes = vec![0xFF, DQT, 0x00, 0x43, 0x01];
        bytes.extend(1..=64u8);
        let mut state = JpegState::for_decoding().unwrap();
        state.read_marker(&mut reader(&bytes)).unwrap();

        assert_eq!(state.quant[1][0], 1);
        assert_eq!(state.quant[1][1], 2);
        assert_eq!(state.quant[1][8], 3);
        assert_eq!(state.quant[1][63], 64);
    }

    #[test]
    fn unknown_segments_are_skipped() {
        let mut state = JpegState::for_decoding().unwrap();
        let mut input = reader(&[0xFF, 0xE0, 0x00, 0x04, 0xAA, 0xBB, 0xFF, DRI, 0x00, 0x04, 0x00, 0x08]);
        state.read_marker(&mut input).unwrap();
        state.read_marker(&mut input).unwrap();

        assert_eq!(state.restart_interval, 8);
        assert!(input.end_of_stream());
    }

    #[test]
    fn truncated_huffman_segment_is_corrupted() {
        let mut bytes = vec![0xFF, DHT, 0x00, 0x05, 0x00];
        bytes.extend([0x01; 16]);
        let mut state = JpegState::for_decoding().unwrap();
        assert!(matches!(
            state.read_marker(&mut reader(&bytes)),
            Err(CodecError::CorruptedJpegStream(_))
        ));
    }
}
