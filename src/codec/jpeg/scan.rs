//! Entropy coded segments: MCU iteration, block and lossless sample coding.

use std::io::Write;

use super::{
    markers::{write_marker, RST0},
    tables::ZIGZAG,
    JpegState,
};
use crate::{
    huffman::HuffmanTable,
    stream::{StreamReader, StreamWriter},
    CodecError, CommonResult,
};

/// Spectral selection and successive approximation of the current scan.
#[derive(Debug, Clone, Copy)]
pub(super) struct Spectral {
    pub start: u32,
    pub end: u32,
    pub bit_high: u32,
    pub bit_low: u32,
}

/// Destination of encoded symbols: either counted into the tables or
/// written out with them.
pub(super) struct Sink<'a, W: Write> {
    writer: Option<&'a mut StreamWriter<W>>,
}

impl<'a, W: Write> Sink<'a, W> {
    pub fn counting() -> Self {
        Self { writer: None }
    }

    pub fn writing(writer: &'a mut StreamWriter<W>) -> Self {
        Self {
            writer: Some(writer),
        }
    }

    fn symbol(&mut self, table: &mut HuffmanTable, symbol: u32) -> CommonResult<()> {
        match self.writer.as_deref_mut() {
            Some(writer) => table.encode(symbol, writer),
            None => {
                table.inc_value_freq(symbol);
                Ok(())
            }
        }
    }

    fn bits(&mut self, value: u32, count: u32) -> CommonResult<()> {
        match self.writer.as_deref_mut() {
            Some(writer) => writer.write_bits(value, count),
            None => Ok(()),
        }
    }

    fn marker(&mut self, marker: u8) -> CommonResult<()> {
        match self.writer.as_deref_mut() {
            Some(writer) => write_marker(writer, marker),
            None => Ok(()),
        }
    }

    pub fn flush(&mut self) -> CommonResult<()> {
        match self.writer.as_deref_mut() {
            Some(writer) => writer.flush_bits(),
            None => Ok(()),
        }
    }
}

/// Value of a `length` bit amplitude: codes below half the range are negative.
fn extend(value: u32, length: u32) -> i32 {
    if length == 0 {
        return 0;
    }
    if value < 1 << (length - 1) {
        value as i32 - (1 << length) + 1
    } else {
        value as i32
    }
}

/// Category and amplitude bits of `value`.
fn magnitude(value: i32) -> (u32, u32) {
    if value == 0 {
        return (0, 0);
    }
    let category = 32 - value.unsigned_abs().leading_zeros();
    let bits = if value < 0 {
        ((1i64 << category) + value as i64 - 1) as u32
    } else {
        value as u32
    };
    (category, bits)
}

fn read_amplitude(reader: &mut StreamReader, length: u32) -> CommonResult<i32> {
    if length == 0 {
        return Ok(0);
    }
    Ok(extend(reader.read_bits(length)?, length))
}

/// Decodes one block of a sequential or progressive scan into `block`,
/// coefficients in natural order.
pub(super) fn read_block(
    reader: &mut StreamReader,
    block: &mut [i32; 64],
    dc: &HuffmanTable,
    ac: &HuffmanTable,
    last_dc: &mut i32,
    spectral: Spectral,
    eob_run: &mut u32,
) -> CommonResult<()> {
    let Spectral {
        start,
        end,
        bit_high,
        bit_low,
    } = spectral;

    if start == 0 {
        if bit_high == 0 {
            let length = dc.decode(reader)?;
            if length > 16 {
                return Err(CodecError::CorruptedJpegStream(format!(
                    "DC category {}",
                    length
                )));
            }
            // DC prediction is modular.
            *last_dc = last_dc.wrapping_add(read_amplitude(reader, length)?);
            block[0] = *last_dc << bit_low;
        } else if reader.read_bit()? == 1 {
            block[0] |= 1 << bit_low;
        }
        if end == 0 {
            return Ok(());
        }
    }

    let mut k = start.max(1);
    if bit_high == 0 {
        if *eob_run > 0 {
            *eob_run -= 1;
            return Ok(());
        }
        while k <= end {
            let symbol = ac.decode(reader)?;
            let run = symbol >> 4;
            let size = symbol & 0x0F;
            if size == 0 {
                if run == 15 {
                    k += 16;
                    continue;
                }
                *eob_run = (1 << run) - 1;
                if run > 0 {
                    *eob_run += reader.read_bits(run)?;
                }
                break;
            }
            k += run;
            if k > 63 {
                return Err(CodecError::CorruptedJpegStream(format!(
                    "AC run past coefficient 63 ({})",
                    k
                )));
            }
            block[ZIGZAG[k as usize]] = read_amplitude(reader, size)? << bit_low;
            k += 1;
        }
        return Ok(());
    }

    // refinement of an earlier AC scan
    let plus = 1 << bit_low;
    let minus = -1 << bit_low;
    let refine = |reader: &mut StreamReader, coefficient: &mut i32| -> CommonResult<()> {
        if reader.read_bit()? == 1 && *coefficient & plus == 0 {
            *coefficient += if *coefficient >= 0 { plus } else { minus };
        }
        Ok(())
    };

    if *eob_run == 0 {
        while k <= end {
            let symbol = ac.decode(reader)?;
            let mut run = symbol >> 4;
            let size = symbol & 0x0F;
            let mut value = 0;
            if size != 0 {
                value = if reader.read_bit()? == 1 { plus } else { minus };
            } else if run != 15 {
                *eob_run = 1 << run;
                if run > 0 {
                    *eob_run += reader.read_bits(run)?;
                }
                break;
            }

            while k <= end {
                let coefficient = &mut block[ZIGZAG[k as usize]];
                if *coefficient != 0 {
                    refine(reader, coefficient)?;
                } else {
                    if run == 0 {
                        break;
                    }
                    run -= 1;
                }
                k += 1;
            }
            if value != 0 && k <= end {
                block[ZIGZAG[k as usize]] = value;
            }
            k += 1;
        }
    }

    if *eob_run > 0 {
        while k <= end {
            let coefficient = &mut block[ZIGZAG[k as usize]];
            if *coefficient != 0 {
                refine(reader, coefficient)?;
            }
            k += 1;
        }
        *eob_run -= 1;
    }
    Ok(())
}

/// Huffman codes one quantized block of a sequential scan.
pub(super) fn write_block<W: Write>(
    block: &[i32; 64],
    dc: &mut HuffmanTable,
    ac: &mut HuffmanTable,
    last_dc: &mut i32,
    sink: &mut Sink<'_, W>,
) -> CommonResult<()> {
    let value = block[0].clamp(-32767, 32767);
    let (category, bits) = magnitude(value - *last_dc);
    *last_dc = value;
    sink.symbol(dc, category)?;
    if category > 0 {
        sink.bits(bits, category)?;
    }

    let mut zeros = 0;
    for position in &ZIGZAG[1..] {
        let value = block[*position].clamp(-32767, 32767);
        if value == 0 {
            zeros += 1;
            continue;
        }
        while zeros >= 16 {
            sink.symbol(ac, 0xF0)?;
            zeros -= 16;
        }
        let (category, bits) = magnitude(value);
        sink.symbol(ac, (zeros << 4) | category)?;
        sink.bits(bits, category)?;
        zeros = 0;
    }
    if zeros > 0 {
        sink.symbol(ac, 0)?;
    }
    Ok(())
}

impl JpegState {
    fn spectral(&self) -> Spectral {
        Spectral {
            start: self.spectral_start,
            end: self.spectral_end,
            bit_high: self.bit_high,
            bit_low: self.bit_low,
        }
    }

    /// Decodes MCUs of the current scan until `stop` of them are done.
    pub(super) fn decode_mcus(&mut self, reader: &mut StreamReader, stop: u32) -> CommonResult<()> {
        let components = self.scan_components.clone();
        let spectral = self.spectral();
        let sample_mask = if self.lossless {
            ((1u32 << (self.precision - self.bit_low)) - 1) as i32
        } else {
            0
        };

        while self.mcu_processed < stop {
            for id in &components {
                let channel = self
                    .channels
                    .get_mut(id)
                    .ok_or_else(|| CodecError::CorruptedJpegStream(format!("no component {}", id)))?;
                let dc = &self.dc_tables[channel.dc_table];
                let ac = &self.ac_tables[channel.ac_table];

                for by in 0..channel.block_mcu_y {
                    for bx in 0..channel.block_mcu_x {
                        let x = self.mcu_x * channel.block_mcu_x + bx;
                        let y = self.mcu_y * channel.block_mcu_y + by;

                        if self.lossless {
                            let category = dc.decode(reader)?;
                            let difference = match category {
                                16 => 32768,
                                0..=15 => read_amplitude(reader, category)?,
                                _ => {
                                    return Err(CodecError::CorruptedJpegStream(format!(
                                        "lossless category {}",
                                        category
                                    )))
                                }
                            };
                            let prediction = channel.predict(x, y, spectral.start);
                            channel.set_sample(x, y, true, (prediction + difference) & sample_mask);
                            continue;
                        }

                        let mut last_dc = channel.last_dc;
                        match channel.block_mut(x, y) {
                            Some(block) => read_block(
                                reader,
                                block,
                                dc,
                                ac,
                                &mut last_dc,
                                spectral,
                                &mut self.eob_run,
                            )?,
                            None => read_block(
                                reader,
                                &mut [0; 64],
                                dc,
                                ac,
                                &mut last_dc,
                                spectral,
                                &mut self.eob_run,
                            )?,
                        }
                        channel.last_dc = last_dc;
                    }
                }
            }
            self.set_mcu_position(self.mcu_processed + 1);
        }
        Ok(())
    }

    /// Runs one scan over prepared samples. A counting sink gathers symbol
    /// frequencies, a writing sink emits the entropy coded segment.
    pub(super) fn encode_scan<W: Write>(&mut self, sink: &mut Sink<'_, W>) -> CommonResult<()> {
        let components = self.scan_components.clone();
        let sample_bits = self.precision;
        self.find_mcu_size();

        while self.mcu_processed < self.mcu_total {
            let interval = self.restart_interval;
            if interval > 0 && self.mcu_processed > 0 && self.mcu_processed % interval == 0 {
                let index = (self.mcu_processed / interval - 1) % 8;
                sink.flush()?;
                sink.marker(RST0 + index as u8)?;
                self.reset_predictors();
            }
            for id in &components {
                let channel = self
                    .channels
                    .get_mut(id)
                    .ok_or_else(|| CodecError::InvalidValue(format!("no jpeg component {}", id)))?;
                let dc = &mut self.dc_tables[channel.dc_table];
                let ac = &mut self.ac_tables[channel.ac_table];

                for by in 0..channel.block_mcu_y {
                    for bx in 0..channel.block_mcu_x {
                        let x = self.mcu_x * channel.block_mcu_x + bx;
                        let y = self.mcu_y * channel.block_mcu_y + by;

                        if self.lossless {
                            let value = channel.sample(x, y, true);
                            let prediction = channel.predict(x, y, 1);
                            let mut difference = (value - prediction) & 0xFFFF;
                            if difference >= 0x8000 {
                                difference -= 0x1_0000;
                            }
                            let (category, bits) = magnitude(difference);
                            sink.symbol(dc, category)?;
                            if category > 0 && category < 16 {
                                sink.bits(bits, category)?;
                            }
                            continue;
                        }

                        let block = channel.block(x, y).copied().ok_or_else(|| {
                            CodecError::InvalidValue(format!("block {},{} outside component", x, y))
                        })?;
                        let mut last_dc = channel.last_dc;
                        write_block(&block, dc, ac, &mut last_dc, sink)?;
                        channel.last_dc = last_dc;
                    }
                }
            }
            self.set_mcu_position(self.mcu_processed + 1);
        }
        tracing::trace!(components = ?components, sample_bits, "jpeg scan encoded");
        sink.flush()
    }
}
