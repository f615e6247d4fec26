use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Arc,
};

use crate::{
    codec::{EXPLICIT_VR_BIG_ENDIAN, EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN},
    config::ParseOptions,
    dictionary::{self, Vr},
    model::{Buffer, DataElement, Dataset, ElementContent, LazyRange},
    stream::{ByteSource, Endian, FileSource, MarkerEscape, MemorySource, StreamReader, StreamWriter},
    CodecError, CommonResult,
};

pub const PREAMBLE_LENGTH: u64 = 128;
pub const MAGIC: &[u8; 4] = b"DICM";

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const ITEM_GROUP: u16 = 0xFFFE;
const ITEM: u16 = 0xE000;
const ITEM_DELIMITATION: u16 = 0xE00D;
const SEQUENCE_DELIMITATION: u16 = 0xE0DD;

/// Byte order and VR explicitness of the stream being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Syntax {
    pub explicit: bool,
    pub endian: Endian,
}

impl Syntax {
    pub const EXPLICIT_LITTLE: Syntax = Syntax {
        explicit: true,
        endian: Endian::Little,
    };

    pub fn from_transfer_syntax(transfer_syntax: &str) -> Self {
        match transfer_syntax {
            IMPLICIT_VR_LITTLE_ENDIAN => Syntax {
                explicit: false,
                endian: Endian::Little,
            },
            EXPLICIT_VR_BIG_ENDIAN => Syntax {
                explicit: true,
                endian: Endian::Big,
            },
            _ => Syntax::EXPLICIT_LITTLE,
        }
    }

    /// The file meta group is always explicit little endian.
    fn for_group(self, group: u16) -> Self {
        if group == 0x0002 {
            Syntax::EXPLICIT_LITTLE
        } else {
            self
        }
    }
}

pub fn parse_file<P: AsRef<Path>>(path: P, options: &ParseOptions) -> CommonResult<Dataset> {
    let source = FileSource::open(path)?;
    parse(Arc::new(source), options)
}

pub fn parse_bytes(data: Vec<u8>, options: &ParseOptions) -> CommonResult<Dataset> {
    parse(Arc::new(MemorySource::new(data)), options)
}

/// Reads a whole stream, with or without the 128 byte preamble.
pub fn parse(source: Arc<dyn ByteSource>, options: &ParseOptions) -> CommonResult<Dataset> {
    let mut reader = StreamReader::new(source, MarkerEscape::None);

    let mut header = [0u8; 8];
    reader
        .read(&mut header)
        .map_err(|_| CodecError::UnrecognizedFormat("stream is too short".into()))?;

    let mut syntax = Syntax::EXPLICIT_LITTLE;
    let has_magic = if reader.len() >= PREAMBLE_LENGTH + 4 {
        reader.seek(PREAMBLE_LENGTH)?;
        reader.read_vec(4)? == MAGIC
    } else {
        false
    };

    if !has_magic {
        // Old NEMA streams start directly with a group 0x0008 or 0x0002 tag.
        if (header[0] != 0x08 && header[0] != 0x02) || header[1] != 0 || header[3] != 0 {
            return Err(CodecError::UnrecognizedFormat(
                "missing DICM signature".into(),
            ));
        }
        syntax.explicit = Vr::from_bytes([header[4], header[5]]).is_some();
        tracing::warn!(explicit = syntax.explicit, "no DICM preamble, reading as NEMA stream");
        reader.seek(0)?;
    }

    let mut dataset = Dataset::new();
    parse_dataset(
        &mut reader,
        &mut dataset,
        syntax,
        options,
        0,
        UNDEFINED_LENGTH,
        true,
    )?;
    Ok(dataset)
}

/// Parses elements until `item_length` bytes are consumed, the stream ends or
/// an item delimiter is met. Returns the number of bytes consumed.
fn parse_dataset(
    reader: &mut StreamReader,
    dataset: &mut Dataset,
    mut syntax: Syntax,
    options: &ParseOptions,
    depth: u32,
    item_length: u32,
    top_level: bool,
) -> CommonResult<u64> {
    if depth > options.max_depth {
        return Err(CodecError::NestingDepthExceeded {
            depth,
            max: options.max_depth,
        });
    }

    let limit = if item_length == UNDEFINED_LENGTH {
        u64::MAX
    } else {
        item_length as u64
    };
    let mut consumed: u64 = 0;
    let mut order: u16 = 0;
    let mut last_group: u16 = 0;
    let mut last_element: u16 = 0;
    let mut first_tag = top_level;
    let mut check_transfer_syntax = top_level;

    while !reader.end_of_stream() && consumed < limit {
        let tag_offset = reader.absolute_position();

        let mut raw_group = [0u8; 2];
        reader.read(&mut raw_group)?;
        consumed += 2;
        let mut group = syntax.endian.read_u16(&raw_group);
        if reader.end_of_stream() {
            return Err(CodecError::UnexpectedEndOfStream.at_tag(group, 0, tag_offset));
        }

        if first_tag && group == 0x0200 {
            syntax.endian = Endian::Big;
            group = syntax.endian.read_u16(&raw_group);
        }
        if check_transfer_syntax && group != 0x0002 {
            if let Some(transfer_syntax) = dataset.transfer_syntax() {
                match transfer_syntax.as_str() {
                    EXPLICIT_VR_BIG_ENDIAN => syntax.endian = Endian::Big,
                    IMPLICIT_VR_LITTLE_ENDIAN => syntax.explicit = false,
                    _ => {}
                }
                tracing::debug!(%transfer_syntax, ?syntax, "file meta group read");
            }
            check_transfer_syntax = false;
            group = syntax.endian.read_u16(&raw_group);
        }
        first_tag = false;

        let element = reader.read_u16(syntax.endian)?;
        consumed += 2;

        if group == ITEM_GROUP && element == ITEM_DELIMITATION {
            reader.read_u32(syntax.endian)?;
            consumed += 4;
            break;
        }

        let mut explicit_vr = None;
        let length;
        if syntax.explicit && group != ITEM_GROUP {
            let mut vr_bytes = [0u8; 2];
            reader.read(&mut vr_bytes)?;
            let short_length = reader.read_u16(syntax.endian)?;
            consumed += 4;
            match Vr::from_bytes(vr_bytes) {
                Some(vr) if vr.is_long_length() => {
                    explicit_vr = Some(vr);
                    length = reader.read_u32(syntax.endian)?;
                    consumed += 4;
                }
                Some(vr) => {
                    explicit_vr = Some(vr);
                    length = short_length as u32;
                }
                // Not a VR: the four bytes were an implicit length.
                None => {
                    length = match syntax.endian {
                        Endian::Little => {
                            ((short_length as u32) << 16)
                                | vr_bytes[0] as u32
                                | ((vr_bytes[1] as u32) << 8)
                        }
                        Endian::Big => {
                            short_length as u32
                                | ((vr_bytes[0] as u32) << 24)
                                | ((vr_bytes[1] as u32) << 16)
                        }
                    };
                }
            }
        } else {
            length = reader.read_u32(syntax.endian)?;
            consumed += 4;
        }
        let vr = explicit_vr.unwrap_or_else(|| {
            if element == 0 {
                Vr::UL
            } else {
                dictionary::default_vr(group, element)
            }
        });

        if group == ITEM_GROUP && element == SEQUENCE_DELIMITATION {
            break;
        }

        // A tag that does not move forward starts a new repetition of its group.
        if (group, element) <= (last_group, last_element) {
            order += 1;
        } else if group > last_group {
            order = 0;
        }
        last_group = group;
        last_element = element;

        tracing::debug!(
            group = format_args!("{:04X}", group),
            element = format_args!("{:04X}", element),
            vr = %vr,
            length,
            depth,
            "element"
        );

        let read = if length != UNDEFINED_LENGTH && vr != Vr::SQ {
            read_value(reader, dataset, group, order, element, vr, length, syntax, options)
        } else {
            read_items(
                reader, dataset, group, order, element, vr, length, syntax, options, depth,
            )
        };
        consumed += read.map_err(|error| error.at_tag(group, element, tag_offset))?;
    }

    Ok(consumed)
}

fn load_buffer(
    reader: &mut StreamReader,
    vr: Vr,
    length: u32,
    endian: Endian,
    options: &ParseOptions,
) -> CommonResult<Buffer> {
    if length as u64 > reader.remaining() {
        return Err(CodecError::CorruptedFile(format!(
            "value of {} bytes extends past the end of the stream",
            length
        )));
    }

    if length > options.lazy_load_threshold {
        let offset = reader.absolute_position();
        reader.skip(length as u64)?;
        return Ok(Buffer::lazy(
            vr,
            LazyRange {
                source: reader.source(),
                offset,
                length: length as u64,
                word_size: vr.word_size(),
                endian,
            },
        ));
    }

    let mut data = reader.read_vec(length as usize)?;
    endian.adjust(&mut data, vr.word_size());
    Ok(Buffer::new(vr, data))
}

#[allow(clippy::too_many_arguments)]
fn read_value(
    reader: &mut StreamReader,
    dataset: &mut Dataset,
    group: u16,
    order: u16,
    element: u16,
    vr: Vr,
    length: u32,
    syntax: Syntax,
    options: &ParseOptions,
) -> CommonResult<u64> {
    // Group lengths are recomputed when writing.
    if element == 0 && group != ITEM_GROUP {
        if length as u64 > reader.remaining() {
            return Err(CodecError::CorruptedFile("group length element is truncated".into()));
        }
        reader.skip(length as u64)?;
        return Ok(length as u64);
    }

    let buffer = load_buffer(reader, vr, length, syntax.endian, options)?;
    dataset.insert_at(group, order, element, DataElement::new(vr, vec![buffer]));
    Ok(length as u64)
}

#[allow(clippy::too_many_arguments)]
fn read_items(
    reader: &mut StreamReader,
    dataset: &mut Dataset,
    group: u16,
    order: u16,
    element: u16,
    vr: Vr,
    mut length: u32,
    syntax: Syntax,
    options: &ParseOptions,
    depth: u32,
) -> CommonResult<u64> {
    let mut consumed: u64 = 0;
    let mut items = Vec::new();
    let mut buffers = Vec::new();

    while length != 0 && !reader.end_of_stream() {
        let item_offset = reader.absolute_position();
        let item_group = reader.read_u16(syntax.endian)?;
        let item_element = reader.read_u16(syntax.endian)?;
        let item_length = reader.read_u32(syntax.endian)?;
        consumed += 8;
        if length != UNDEFINED_LENGTH {
            length = length.saturating_sub(8);
        }

        if item_group == ITEM_GROUP && item_element == SEQUENCE_DELIMITATION {
            break;
        }
        if item_group != ITEM_GROUP || item_element != ITEM {
            tracing::warn!(
                item_group = format_args!("{:04X}", item_group),
                item_element = format_args!("{:04X}", item_element),
                "unexpected tag where a sequence item was expected"
            );
        }

        if item_length == UNDEFINED_LENGTH || vr == Vr::SQ {
            let mut item = Dataset::new();
            item.set_item_offset(item_offset);
            let effective = parse_dataset(
                reader,
                &mut item,
                syntax,
                options,
                depth + 1,
                item_length,
                false,
            )?;
            consumed += effective;
            if length != UNDEFINED_LENGTH {
                length = length.saturating_sub(effective as u32);
            }
            items.push(item);
            continue;
        }

        let buffer = load_buffer(reader, vr, item_length, syntax.endian, options)?;
        consumed += item_length as u64;
        if length != UNDEFINED_LENGTH {
            length = length.saturating_sub(item_length);
        }
        buffers.push(buffer);
    }

    let data = if vr == Vr::SQ || !items.is_empty() {
        if !buffers.is_empty() {
            tracing::warn!(
                fragments = buffers.len(),
                "dropping fragments mixed with sequence items"
            );
        }
        DataElement::sequence(items)
    } else {
        DataElement::new(vr, buffers)
    };
    dataset.insert_at(group, order, element, data);

    Ok(consumed)
}

pub fn to_bytes(dataset: &Dataset) -> CommonResult<Vec<u8>> {
    write(dataset, Vec::new())
}

pub fn write_file<P: AsRef<Path>>(dataset: &Dataset, path: P) -> CommonResult<()> {
    let file = File::create(path)?;
    let mut writer = write(dataset, BufWriter::new(file))?;
    writer.flush()?;
    Ok(())
}

/// Writes preamble, signature and the dataset with the byte order and VR mode
/// named by its transfer syntax (explicit little endian when absent).
pub fn write<W: Write>(dataset: &Dataset, output: W) -> CommonResult<W> {
    let transfer_syntax = dataset
        .transfer_syntax()
        .unwrap_or_else(|| EXPLICIT_VR_LITTLE_ENDIAN.to_string());
    let syntax = Syntax::from_transfer_syntax(&transfer_syntax);
    tracing::debug!(%transfer_syntax, ?syntax, "writing dataset");

    let mut writer = StreamWriter::new(output, MarkerEscape::None);
    writer.write(&[0u8; PREAMBLE_LENGTH as usize])?;
    writer.write(MAGIC)?;
    write_dataset(&mut writer, dataset, syntax)?;
    Ok(writer.into_inner())
}

pub fn write_dataset<W: Write>(
    writer: &mut StreamWriter<W>,
    dataset: &Dataset,
    syntax: Syntax,
) -> CommonResult<()> {
    for ((group, _), elements) in dataset.groups() {
        let group_syntax = syntax.for_group(group);
        let group_length = group_length(group, elements, group_syntax)?;
        if group_length == 0 {
            continue;
        }
        let group_length = u32::try_from(group_length).map_err(|_| {
            CodecError::InvalidValue(format!("group {:04X} is too large", group))
        })?;

        write_tag_header(writer, group, 0, Vr::UL, 4, false, group_syntax)?;
        writer.write_u32(group_length, group_syntax.endian)?;

        for (element, data) in elements.elements().filter(|(element, _)| *element != 0) {
            write_element(writer, group, element, data, group_syntax)
                .map_err(|error| error.at_tag(group, element, writer.absolute_position()))?;
        }
    }
    Ok(())
}

fn write_tag_header<W: Write>(
    writer: &mut StreamWriter<W>,
    group: u16,
    element: u16,
    vr: Vr,
    length: u32,
    sequence: bool,
    syntax: Syntax,
) -> CommonResult<()> {
    writer.write_u16(group, syntax.endian)?;
    writer.write_u16(element, syntax.endian)?;

    if !syntax.explicit || group == ITEM_GROUP {
        return writer.write_u32(length, syntax.endian);
    }

    writer.write(vr.code().as_bytes())?;
    if vr.is_long_length() || sequence {
        writer.write_u16(0, syntax.endian)?;
        writer.write_u32(length, syntax.endian)
    } else {
        let length = u16::try_from(length).map_err(|_| {
            CodecError::InvalidValue(format!("{} bytes do not fit a {} value", length, vr))
        })?;
        writer.write_u16(length, syntax.endian)
    }
}

fn write_element<W: Write>(
    writer: &mut StreamWriter<W>,
    group: u16,
    element: u16,
    data: &DataElement,
    syntax: Syntax,
) -> CommonResult<()> {
    let vr = data.vr();

    if !data.is_sequence() {
        let length = match data.buffers().first() {
            Some(buffer) => padded(buffer.len() as u64),
            None => 0,
        };
        write_tag_header(writer, group, element, vr, length as u32, false, syntax)?;
        if let Some(buffer) = data.buffers().first() {
            write_buffer(writer, vr, buffer, syntax.endian)?;
        }
        return Ok(());
    }

    if syntax.explicit && !vr.is_long_length() {
        return Err(CodecError::InvalidValue(format!(
            "{} values cannot hold items",
            vr
        )));
    }
    write_tag_header(writer, group, element, vr, UNDEFINED_LENGTH, true, syntax)?;
    match data.content() {
        ElementContent::Items(items) => {
            for item in items {
                let length = dataset_length(item, syntax)?;
                write_tag_header(writer, ITEM_GROUP, ITEM, Vr::UN, length as u32, false, syntax)?;
                write_dataset(writer, item, syntax)?;
            }
        }
        ElementContent::Buffers(buffers) => {
            for buffer in buffers {
                let length = padded(buffer.len() as u64);
                write_tag_header(writer, ITEM_GROUP, ITEM, Vr::UN, length as u32, false, syntax)?;
                write_buffer(writer, vr, buffer, syntax.endian)?;
            }
        }
    }
    write_tag_header(writer, ITEM_GROUP, SEQUENCE_DELIMITATION, Vr::UN, 0, false, syntax)
}

fn write_buffer<W: Write>(
    writer: &mut StreamWriter<W>,
    vr: Vr,
    buffer: &Buffer,
    endian: Endian,
) -> CommonResult<()> {
    let mut data = buffer.data()?.to_vec();
    endian.adjust(&mut data, vr.word_size());
    if data.len() % 2 == 1 {
        data.push(vr.padding_byte());
    }
    writer.write(&data)
}

fn padded(length: u64) -> u64 {
    length + (length & 1)
}

fn header_length(group: u16, vr: Vr, sequence: bool, syntax: Syntax) -> u64 {
    if syntax.explicit && group != ITEM_GROUP && (vr.is_long_length() || sequence) {
        12
    } else {
        8
    }
}

fn element_length(group: u16, data: &DataElement, syntax: Syntax) -> CommonResult<u64> {
    let sequence = data.is_sequence();
    let header = header_length(group, data.vr(), sequence, syntax);

    if !sequence {
        let value = data
            .buffers()
            .first()
            .map(|buffer| padded(buffer.len() as u64))
            .unwrap_or(0);
        return Ok(header + value);
    }

    // Each item carries an 8 byte header, the sequence ends with an 8 byte delimiter.
    let mut content = 8;
    match data.content() {
        ElementContent::Items(items) => {
            for item in items {
                content += 8 + dataset_length(item, syntax)?;
            }
        }
        ElementContent::Buffers(buffers) => {
            for buffer in buffers {
                content += 8 + padded(buffer.len() as u64);
            }
        }
    }
    Ok(header + content)
}

fn group_length(group: u16, elements: &crate::model::Group, syntax: Syntax) -> CommonResult<u64> {
    let mut length = 0;
    for (element, data) in elements.elements() {
        if element != 0 {
            length += element_length(group, data, syntax)?;
        }
    }
    Ok(length)
}

/// Bytes `write_dataset` produces for `dataset`, group length elements included.
pub fn dataset_length(dataset: &Dataset, syntax: Syntax) -> CommonResult<u64> {
    let mut length = 0;
    for ((group, _), elements) in dataset.groups() {
        let group_length = group_length(group, elements, syntax.for_group(group))?;
        if group_length != 0 {
            length += group_length + 12;
        }
    }
    if length > u32::MAX as u64 {
        return Err(CodecError::InvalidValue("item is too large".into()));
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let mut dataset = Dataset::new();
        dataset
            .set_string(0x0002, 0x0010, Vr::UI, EXPLICIT_VR_LITTLE_ENDIAN)
            .unwrap();
        dataset.set_string(0x0010, 0x0010, Vr::PN, "Doe^Jane").unwrap();
        dataset.set_unsigned(0x0028, 0x0010, Vr::US, 512).unwrap();
        dataset
    }

    #[test]
    fn writes_preamble_and_group_lengths() {
        let bytes = to_bytes(&sample()).unwrap();

        assert_eq!(&bytes[128..132], b"DICM");
        // (0002,0000) UL 4 followed by the meta group length
        assert_eq!(&bytes[132..140], &[0x02, 0x00, 0x00, 0x00, b'U', b'L', 4, 0]);
        let meta_length = u32::from_le_bytes([bytes[140], bytes[141], bytes[142], bytes[143]]);
        // UI header (8) + "1.2.840.10008.1.2.1" padded to 20
        assert_eq!(meta_length, 28);
    }

    #[test]
    fn dataset_length_matches_written_bytes() {
        let mut item = Dataset::new();
        item.set_string(0x0008, 0x1150, Vr::UI, "1.2.3.4").unwrap();
        let mut dataset = sample();
        dataset.add_sequence_item(0x0008, 0x1140, item).unwrap();
        dataset.insert(
            0x7FE0,
            0x0010,
            DataElement::new(
                Vr::OB,
                vec![Buffer::new(Vr::OB, vec![]), Buffer::new(Vr::OB, vec![1, 2, 3])],
            ),
        );

        let bytes = to_bytes(&dataset).unwrap();
        let expected = dataset_length(&dataset, Syntax::EXPLICIT_LITTLE).unwrap();
        assert_eq!(bytes.len() as u64, PREAMBLE_LENGTH + 4 + expected);
    }

    #[test]
    fn rejects_unknown_signature() {
        let error = parse_bytes(vec![0x55; 200], &ParseOptions::default()).unwrap_err();
        assert!(error.is_unrecognized_format());

        let error = parse_bytes(vec![1, 2, 3], &ParseOptions::default()).unwrap_err();
        assert!(error.is_unrecognized_format());
    }

    #[test]
    fn reads_nema_stream_without_preamble() {
        // (0008,0060) CS "CT" in explicit little endian, no preamble.
        let bytes = vec![0x08, 0x00, 0x60, 0x00, b'C', b'S', 2, 0, b'C', b'T'];
        let dataset = parse_bytes(bytes, &ParseOptions::default()).unwrap();

        assert_eq!(dataset.get_string(0x0008, 0x0060, 0).unwrap(), "CT");
    }

    #[test]
    fn reads_nema_implicit_stream() {
        // (0008,0060) implicit, length 2.
        let bytes = vec![0x08, 0x00, 0x60, 0x00, 2, 0, 0, 0, b'M', b'R'];
        let dataset = parse_bytes(bytes, &ParseOptions::default()).unwrap();

        let element = dataset.element(0x0008, 0x0060).unwrap();
        assert_eq!(element.vr(), Vr::CS);
        assert_eq!(dataset.get_string(0x0008, 0x0060, 0).unwrap(), "MR");
    }

    #[test]
    fn records_item_offsets() {
        let mut dataset = sample();
        let mut item = Dataset::new();
        item.set_string(0x0008, 0x1150, Vr::UI, "1.2").unwrap();
        dataset.add_sequence_item(0x0008, 0x1140, item).unwrap();

        let bytes = to_bytes(&dataset).unwrap();
        let parsed = parse_bytes(bytes.clone(), &ParseOptions::default()).unwrap();
        let offset = parsed.sequence_item(0x0008, 0x1140, 0).unwrap().item_offset() as usize;

        assert_eq!(&bytes[offset..offset + 4], &[0xFE, 0xFF, 0x00, 0xE0]);
    }

    #[test]
    fn lazy_values_stay_in_the_source() {
        let mut dataset = sample();
        dataset.set_bytes(0x7FE0, 0x0010, Vr::OW, (0..64u8).collect());
        let bytes = to_bytes(&dataset).unwrap();

        let options = ParseOptions::default().with_lazy_load_threshold(32);
        let parsed = parse_bytes(bytes, &options).unwrap();
        let pixels = &parsed.element(0x7FE0, 0x0010).unwrap().buffers()[0];

        assert!(!pixels.is_loaded());
        assert_eq!(pixels.data().unwrap(), &(0..64u8).collect::<Vec<u8>>()[..]);
        assert_eq!(parsed, dataset);
    }

    #[test]
    fn truncated_value_reports_position() {
        let mut bytes = to_bytes(&sample()).unwrap();
        bytes.truncate(bytes.len() - 1);

        let error = parse_bytes(bytes, &ParseOptions::default()).unwrap_err();
        match error {
            CodecError::AtTag { group, element, .. } => {
                assert_eq!((group, element), (0x0028, 0x0010));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn repeated_groups_get_increasing_order() {
        let mut dataset = Dataset::new();
        dataset.insert_at(0x0009, 0, 0x0010, DataElement::from_bytes(Vr::LO, b"AB".to_vec()));
        dataset.insert_at(0x0009, 1, 0x0010, DataElement::from_bytes(Vr::LO, b"CD".to_vec()));

        let parsed = parse_bytes(to_bytes(&dataset).unwrap(), &ParseOptions::default()).unwrap();
        assert_eq!(parsed, dataset);
        assert!(parsed.element_at(0x0009, 1, 0x0010).is_some());
    }

    #[test]
    fn lower_group_after_higher_element_is_a_repetition() {
        let mut bytes = vec![0u8; PREAMBLE_LENGTH as usize];
        bytes.extend_from_slice(MAGIC);
        // (0010,0020) LO "ID" then (0008,0030) TM "1200".
        bytes.extend_from_slice(&[0x10, 0x00, 0x20, 0x00, b'L', b'O', 2, 0, b'I', b'D']);
        bytes.extend_from_slice(&[0x08, 0x00, 0x30, 0x00, b'T', b'M', 4, 0, b'1', b'2', b'0', b'0']);
        let parsed = parse_bytes(bytes, &ParseOptions::default()).unwrap();

        assert!(parsed.element_at(0x0008, 0, 0x0030).is_none());
        let time = parsed.element_at(0x0008, 1, 0x0030).unwrap();
        assert_eq!(time.data().unwrap(), b"1200");
        assert_eq!(parsed.get_string(0x0010, 0x0020, 0).unwrap(), "ID");
    }

    #[test]
    fn dangling_group_bytes_are_truncation() {
        let mut bytes = to_bytes(&sample()).unwrap();
        let tail = bytes.len() as u64;
        bytes.extend_from_slice(&[0x30, 0x00]);

        let error = parse_bytes(bytes, &ParseOptions::default()).unwrap_err();
        assert!(matches!(error.root(), CodecError::UnexpectedEndOfStream));
        match error {
            CodecError::AtTag { group, offset, .. } => {
                assert_eq!(group, 0x0030);
                assert_eq!(offset, tail);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
