//! Property tests for the bit level stream, Huffman tables and RLE segments.

use dicom_codec::{
    codec::rle::{decode_segment, encode_segment},
    huffman::{HuffmanTable, MAX_CODE_LENGTH},
    stream::{MarkerEscape, StreamReader, StreamWriter},
};
use proptest::prelude::*;

fn escape_strategy() -> impl Strategy<Value = MarkerEscape> {
    prop_oneof![Just(MarkerEscape::None), Just(MarkerEscape::Jpeg)]
}

/// `(value, width)` pairs with the value masked to its width.
fn fields_strategy() -> impl Strategy<Value = Vec<(u32, u32)>> {
    prop::collection::vec(
        (any::<u32>(), 1u32..=32).prop_map(|(value, width)| {
            let mask = if width == 32 { u32::MAX } else { (1 << width) - 1 };
            (value & mask, width)
        }),
        1..200,
    )
}

/// Byte planes mixing long runs, short runs and noise.
fn plane_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(
        prop_oneof![
            (any::<u8>(), 1usize..300).prop_map(|(byte, count)| vec![byte; count]),
            (any::<u8>(), 2usize..4).prop_map(|(byte, count)| vec![byte; count]),
            prop::collection::vec(any::<u8>(), 1..40),
        ],
        0..12,
    )
    .prop_map(|chunks| chunks.concat())
}

proptest! {
    #[test]
    fn bit_fields_round_trip(fields in fields_strategy(), escape in escape_strategy()) {
        let mut writer = StreamWriter::new(Vec::new(), escape);
        for (value, width) in &fields {
            writer.write_bits(*value, *width).unwrap();
        }
        writer.flush_bits().unwrap();
        let bytes = writer.into_inner();

        let total_bits = fields.iter().map(|(_, width)| *width as usize).sum::<usize>();
        if escape == MarkerEscape::None {
            prop_assert_eq!(bytes.len(), total_bits.div_ceil(8));
        }

        let mut reader = StreamReader::from_bytes(bytes, escape);
        for (value, width) in &fields {
            prop_assert_eq!(reader.read_bits(*width).unwrap(), *value);
        }
    }

    #[test]
    fn single_bits_match_wide_reads(bytes in prop::collection::vec(any::<u8>(), 1..64)) {
        let mut wide = StreamReader::from_bytes(bytes.clone(), MarkerEscape::None);
        let mut narrow = StreamReader::from_bytes(bytes.clone(), MarkerEscape::None);

        for _ in 0..bytes.len() {
            let mut assembled = 0;
            for _ in 0..8 {
                assembled = (assembled << 1) | narrow.read_bit().unwrap();
            }
            prop_assert_eq!(wide.read_bits(8).unwrap(), assembled);
        }
        prop_assert!(narrow.read_bit().is_err());
    }

    #[test]
    fn huffman_codes_decode_to_their_symbols(
        message in prop::collection::vec(0u32..256, 1..400),
    ) {
        let mut table = HuffmanTable::new(8);
        for symbol in &message {
            table.inc_value_freq(*symbol);
        }
        table.inc_value_freq(0x100);
        table.build_code_lengths(MAX_CODE_LENGTH);
        table.remove_last_code();
        table.build_tables().unwrap();

        for symbol in &message {
            let length = table.code_length(*symbol);
            prop_assert!((1..=MAX_CODE_LENGTH).contains(&length));
        }

        let mut writer = StreamWriter::new(Vec::new(), MarkerEscape::Jpeg);
        for symbol in &message {
            table.encode(*symbol, &mut writer).unwrap();
        }
        writer.flush_bits().unwrap();

        let mut reader = StreamReader::from_bytes(writer.into_inner(), MarkerEscape::Jpeg);
        for symbol in &message {
            prop_assert_eq!(table.decode(&mut reader).unwrap(), *symbol);
        }
    }

    #[test]
    fn skewed_frequencies_stay_within_sixteen_bits(
        exponents in prop::collection::vec(0u32..11, 2..60),
    ) {
        let mut table = HuffmanTable::new(8);
        for (symbol, exponent) in exponents.iter().enumerate() {
            for _ in 0..1u32 << exponent {
                table.inc_value_freq(symbol as u32);
            }
        }
        table.inc_value_freq(0x100);
        table.build_code_lengths(MAX_CODE_LENGTH);
        table.remove_last_code();
        table.build_tables().unwrap();

        let counts = table.code_counts();
        prop_assert_eq!(
            counts.iter().map(|count| *count as usize).sum::<usize>(),
            exponents.len()
        );
        for symbol in 0..exponents.len() as u32 {
            prop_assert!(table.code_length(symbol) <= MAX_CODE_LENGTH);
        }
    }

    #[test]
    fn rle_segments_round_trip(plane in plane_strategy(), row_len in 0usize..64) {
        let encoded = encode_segment(&plane, row_len);
        prop_assert_eq!(encoded.len() % 2, 0);
        prop_assert_eq!(decode_segment(&encoded, plane.len()).unwrap(), plane);
    }

    #[test]
    fn rle_runs_never_cross_rows(byte in any::<u8>(), rows in 1usize..6, row_len in 1usize..200) {
        let plane = vec![byte; rows * row_len];
        let encoded = encode_segment(&plane, row_len);

        let mut produced = 0;
        let mut position = 0;
        while produced < plane.len() {
            let command = encoded[position] as i8;
            let count = match command {
                -128 => {
                    position += 1;
                    continue;
                }
                0.. => {
                    position += 2 + command as usize;
                    command as usize + 1
                }
                _ => {
                    position += 2;
                    (1 - command as isize) as usize
                }
            };
            prop_assert!(produced / row_len == (produced + count - 1) / row_len);
            produced += count;
        }
        prop_assert_eq!(produced, plane.len());
    }
}
