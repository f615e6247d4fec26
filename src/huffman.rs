use std::{cmp::Reverse, collections::BTreeSet, io::Write};

use crate::{
    stream::{StreamReader, StreamWriter},
    CodecError, CommonResult,
};

/// Longest code a table can hold once built.
pub const MAX_CODE_LENGTH: u32 = 16;

#[derive(Debug, Clone, Copy, Default)]
struct SymbolState {
    freq: u64,
    code_length: u32,
    next: Option<u32>,
}

/// Canonical Huffman table for symbols `0..=2^value_bits`.
///
/// The extra symbol `2^value_bits` is never written by callers; JPEG counts it
/// once and then drops its code with `remove_last_code`, so no emitted code is
/// made only of 1 bits.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    symbols: Vec<SymbolState>,
    ordered_values: Vec<u32>,
    values_per_length: Vec<u32>,
    min_code_per_length: [u32; MAX_CODE_LENGTH as usize + 1],
    max_code_per_length: [u32; MAX_CODE_LENGTH as usize + 1],
    value_codes: Vec<u32>,
    value_code_lengths: Vec<u32>,
    first_valid_length: u32,
}

impl HuffmanTable {
    pub fn new(value_bits: u32) -> Self {
        let num_values = (1usize << value_bits) + 1;

        Self {
            symbols: vec![SymbolState::default(); num_values],
            ordered_values: vec![0; num_values],
            values_per_length: vec![0; num_values + 1],
            min_code_per_length: [u32::MAX; MAX_CODE_LENGTH as usize + 1],
            max_code_per_length: [u32::MAX; MAX_CODE_LENGTH as usize + 1],
            value_codes: vec![0; num_values],
            value_code_lengths: vec![0; num_values],
            first_valid_length: 0,
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn reset(&mut self) {
        self.symbols.fill(SymbolState::default());
        self.ordered_values.fill(0);
        self.values_per_length.fill(0);
        self.min_code_per_length.fill(u32::MAX);
        self.max_code_per_length.fill(u32::MAX);
        self.value_codes.fill(0);
        self.value_code_lengths.fill(0);
        self.first_valid_length = 0;
    }

    pub fn inc_value_freq(&mut self, symbol: u32) {
        if let Some(state) = self.symbols.get_mut(symbol as usize) {
            state.freq += 1;
        }
    }

    /// Derives code lengths from the accumulated frequencies, limited to
    /// `max_code_length` bits (never more than 16).
    pub fn build_code_lengths(&mut self, max_code_length: u32) {
        let max_code_length = max_code_length.clamp(1, MAX_CODE_LENGTH) as usize;

        let mut queue: BTreeSet<(u64, Reverse<u32>)> = self
            .symbols
            .iter()
            .enumerate()
            .filter(|(_, state)| state.freq != 0)
            .map(|(value, state)| (state.freq, Reverse(value as u32)))
            .collect();

        if queue.len() == 1 {
            if let Some((_, Reverse(value))) = queue.first() {
                self.symbols[*value as usize].code_length = 1;
            }
        }

        // Merge the two rarest nodes; on equal counts the higher symbol goes first.
        while queue.len() > 1 {
            let (Some((freq0, Reverse(value0))), Some((freq1, Reverse(value1)))) =
                (queue.pop_first(), queue.pop_first())
            else {
                break;
            };
            let merged = freq0 + freq1;
            self.symbols[value0 as usize].freq = merged;
            self.symbols[value1 as usize].freq = 0;
            self.symbols[value0 as usize].code_length += 1;
            queue.insert((merged, Reverse(value0)));

            let mut chained = value0;
            while let Some(next) = self.symbols[chained as usize].next {
                chained = next;
                self.symbols[chained as usize].code_length += 1;
            }
            self.symbols[chained as usize].next = Some(value1);
            while let Some(next) = self.symbols[chained as usize].next {
                chained = next;
                self.symbols[chained as usize].code_length += 1;
            }
        }

        let mut by_length: Vec<(u32, u32)> = self
            .symbols
            .iter()
            .enumerate()
            .filter(|(_, state)| state.code_length != 0)
            .map(|(value, state)| (state.code_length, value as u32))
            .collect();
        by_length.sort_unstable();

        self.values_per_length.fill(0);
        for (index, (length, value)) in by_length.iter().enumerate() {
            self.values_per_length[*length as usize] += 1;
            self.ordered_values[index] = *value;
        }

        // Move codes up from the deepest level: two codes at level i become one
        // at i - 1, and a code at the nearest populated level j <= i - 2 splits
        // into two at j + 1.
        for length in ((max_code_length + 1)..self.values_per_length.len()).rev() {
            while self.values_per_length[length] != 0 {
                let Some(shorter) = (1..length - 1)
                    .rev()
                    .find(|candidate| self.values_per_length[*candidate] != 0)
                else {
                    break;
                };
                if self.values_per_length[length] < 2 {
                    self.values_per_length[length] = 0;
                    self.values_per_length[length - 1] += 1;
                    continue;
                }
                self.values_per_length[length] -= 2;
                self.values_per_length[length - 1] += 1;
                self.values_per_length[shorter + 1] += 2;
                self.values_per_length[shorter] -= 1;
            }
        }

        self.first_valid_length = (1..=MAX_CODE_LENGTH)
            .find(|length| self.values_per_length[*length as usize] != 0)
            .unwrap_or(0);
    }

    /// Drops the last code of the deepest populated length.
    pub fn remove_last_code(&mut self) {
        if let Some(length) = (1..self.values_per_length.len())
            .rev()
            .find(|length| self.values_per_length[*length] != 0)
        {
            self.values_per_length[length] -= 1;
        }
    }

    /// Assigns canonical codes in (length, symbol order) and records the code
    /// range of every length.
    pub fn build_tables(&mut self) -> CommonResult<()> {
        self.min_code_per_length.fill(u32::MAX);
        self.max_code_per_length.fill(u32::MAX);
        self.value_codes.fill(0);
        self.value_code_lengths.fill(0);
        self.first_valid_length = 0;

        let mut code: u32 = 0;
        let mut value_index = 0usize;
        for length in 1..=MAX_CODE_LENGTH {
            let count = self.values_per_length[length as usize];
            if count != 0 && self.first_valid_length == 0 {
                self.first_valid_length = length;
            }
            for generated in 0..count {
                let value = *self.ordered_values.get(value_index).ok_or_else(|| {
                    CodecError::CorruptedJpegStream("huffman table has too many codes".into())
                })?;
                if generated == 0 {
                    self.min_code_per_length[length as usize] = code;
                }
                self.max_code_per_length[length as usize] = code;
                if let Some(slot) = self.value_codes.get_mut(value as usize) {
                    *slot = code;
                    self.value_code_lengths[value as usize] = length;
                }
                value_index += 1;
                code += 1;
            }
            if code > (1u32 << length) {
                return Err(CodecError::CorruptedJpegStream(
                    "huffman table is oversubscribed".into(),
                ));
            }
            code <<= 1;
        }
        Ok(())
    }

    /// Loads a table as stored in a DHT segment: code counts for lengths 1..=16
    /// followed by the symbols in canonical order.
    pub fn load_definition(&mut self, counts: &[u8; 16], values: &[u8]) -> CommonResult<()> {
        let total: usize = counts.iter().map(|count| *count as usize).sum();
        if total != values.len() || total > self.ordered_values.len() {
            return Err(CodecError::CorruptedJpegStream(format!(
                "huffman table declares {} codes but carries {} values",
                total,
                values.len()
            )));
        }
        self.reset();
        for (index, count) in counts.iter().enumerate() {
            self.values_per_length[index + 1] = *count as u32;
        }
        for (index, value) in values.iter().enumerate() {
            self.ordered_values[index] = *value as u32;
        }
        self.build_tables()
    }

    /// Number of codes of each length 1..=16, as written in a DHT segment.
    pub fn code_counts(&self) -> [u8; 16] {
        let mut counts = [0u8; 16];
        for (index, count) in counts.iter_mut().enumerate() {
            *count = self.values_per_length[index + 1] as u8;
        }
        counts
    }

    /// Symbols that received a code, in canonical order.
    pub fn coded_values(&self) -> &[u32] {
        let total: u32 = self.values_per_length[1..=MAX_CODE_LENGTH as usize].iter().sum();
        &self.ordered_values[..total as usize]
    }

    pub fn is_defined(&self) -> bool {
        self.first_valid_length != 0
    }

    pub fn code_length(&self, symbol: u32) -> u32 {
        self.value_code_lengths
            .get(symbol as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn decode(&self, reader: &mut StreamReader) -> CommonResult<u32> {
        let first = self.first_valid_length;
        if first == 0 {
            return Err(CodecError::InvalidHuffmanCode);
        }

        let mut code = reader.read_bits(first)?;
        if code <= self.max_code_per_length[first as usize] {
            return self.ordered_at(0, code, first);
        }

        let mut ordered_index = self.values_per_length[first as usize];
        let mut missing_bits = 0;
        for length in (first + 1)..=MAX_CODE_LENGTH {
            missing_bits += 1;
            let count = self.values_per_length[length as usize];
            if count == 0 {
                continue;
            }
            code = (code << missing_bits)
                | if missing_bits == 1 {
                    reader.read_bit()?
                } else {
                    reader.read_bits(missing_bits)?
                };
            missing_bits = 0;
            if code <= self.max_code_per_length[length as usize] {
                return self.ordered_at(ordered_index, code, length);
            }
            ordered_index += count;
        }

        Err(CodecError::InvalidHuffmanCode)
    }

    fn ordered_at(&self, base: u32, code: u32, length: u32) -> CommonResult<u32> {
        code.checked_sub(self.min_code_per_length[length as usize])
            .and_then(|offset| self.ordered_values.get((base + offset) as usize))
            .copied()
            .ok_or(CodecError::InvalidHuffmanCode)
    }

    pub fn encode<W: Write>(&self, symbol: u32, writer: &mut StreamWriter<W>) -> CommonResult<()> {
        let length = self.code_length(symbol);
        if length == 0 {
            return Err(CodecError::UnencodableSymbol(symbol));
        }
        writer.write_bits(self.value_codes[symbol as usize], length)
    }
}
