//! Frames of the pixel data element `(7FE0,0010)`: the attributes that
//! describe them and the mapping between frames and stored bytes.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    codec::{CodecRegistry, FrameLayout, IMPLICIT_VR_LITTLE_ENDIAN},
    config::EncodeOptions,
    dictionary::Vr,
    frame::Frame,
    model::{Buffer, DataElement, Dataset, TRANSFER_SYNTAX},
    CodecError, CommonResult,
};

pub const SAMPLES_PER_PIXEL: (u16, u16) = (0x0028, 0x0002);
pub const PHOTOMETRIC_INTERPRETATION: (u16, u16) = (0x0028, 0x0004);
pub const PLANAR_CONFIGURATION: (u16, u16) = (0x0028, 0x0006);
pub const NUMBER_OF_FRAMES: (u16, u16) = (0x0028, 0x0008);
pub const ROWS: (u16, u16) = (0x0028, 0x0010);
pub const COLUMNS: (u16, u16) = (0x0028, 0x0011);
pub const BITS_ALLOCATED: (u16, u16) = (0x0028, 0x0100);
pub const BITS_STORED: (u16, u16) = (0x0028, 0x0101);
pub const HIGH_BIT: (u16, u16) = (0x0028, 0x0102);
pub const PIXEL_REPRESENTATION: (u16, u16) = (0x0028, 0x0103);
pub const PIXEL_DATA: (u16, u16) = (0x7FE0, 0x0010);

/// Tag and length of an item header.
const ITEM_HEADER_LENGTH: u64 = 8;

impl Dataset {
    /// Frames held by the pixel data element, 0 when there is none.
    pub fn frame_count(&self) -> u32 {
        if !self.contains(PIXEL_DATA.0, PIXEL_DATA.1) {
            return 0;
        }
        self.get_unsigned(NUMBER_OF_FRAMES.0, NUMBER_OF_FRAMES.1, 0)
            .map(|count| count.max(1))
            .unwrap_or(1)
    }
}

fn trimmed(text: String) -> String {
    text.trim_matches(|c: char| c == ' ' || c == '\0').to_string()
}

/// Reads the image pixel module attributes of `dataset`.
pub fn layout_from(dataset: &Dataset) -> CommonResult<FrameLayout> {
    let get = |tag: (u16, u16)| dataset.get_unsigned(tag.0, tag.1, 0);

    let width = get(COLUMNS)?;
    let height = get(ROWS)?;
    let bits_allocated = get(BITS_ALLOCATED)?;
    let channels = get(SAMPLES_PER_PIXEL).unwrap_or(1);
    let bits_stored = get(BITS_STORED).unwrap_or(bits_allocated);
    let high_bit = get(HIGH_BIT).unwrap_or(bits_stored.saturating_sub(1));
    let signed = get(PIXEL_REPRESENTATION).unwrap_or(0) == 1;
    let planar = channels > 1 && get(PLANAR_CONFIGURATION).unwrap_or(0) == 1;

    let color_space = dataset
        .get_string(PHOTOMETRIC_INTERPRETATION.0, PHOTOMETRIC_INTERPRETATION.1, 0)
        .map(trimmed)
        .unwrap_or_else(|_| {
            let default = if channels == 3 { "RGB" } else { "MONOCHROME2" };
            default.to_string()
        });
    let transfer_syntax = dataset
        .transfer_syntax()
        .map(trimmed)
        .unwrap_or_else(|| IMPLICIT_VR_LITTLE_ENDIAN.to_string());

    if width == 0 || height == 0 || channels == 0 {
        return Err(CodecError::InvalidValue(format!(
            "{}x{} image with {} samples per pixel",
            width, height, channels
        )));
    }

    Ok(FrameLayout {
        width,
        height,
        channels,
        bits_allocated,
        bits_stored,
        high_bit,
        signed,
        planar,
        color_space,
        transfer_syntax,
    })
}

/// Bytes of frame `index` of an encapsulated pixel data element.
///
/// The first fragment is the offset table. One fragment per frame maps
/// directly; otherwise the table offsets, counted from the first fragment
/// item, select the fragments of each frame. A single frame without a table
/// takes every fragment.
fn encapsulated_frame(element: &DataElement, index: u32, count: u32) -> CommonResult<Vec<u8>> {
    let buffers = element.buffers();
    let Some((table, fragments)) = buffers.split_first() else {
        return Err(CodecError::CorruptedFile(
            "encapsulated pixel data without an offset table item".to_string(),
        ));
    };

    if fragments.len() == count as usize {
        let fragment = fragments
            .get(index as usize)
            .ok_or(CodecError::FrameNotFound(index))?;
        return Ok(fragment.data()?.to_vec());
    }

    let offsets = table
        .data()?
        .chunks_exact(4)
        .map(|offset| LittleEndian::read_u32(offset) as u64)
        .collect::<Vec<u64>>();

    let (start, end) = if offsets.is_empty() {
        if count != 1 {
            return Err(CodecError::CorruptedFile(format!(
                "{} fragments cannot be split into {} frames without an offset table",
                fragments.len(),
                count
            )));
        }
        (0, u64::MAX)
    } else {
        let start = *offsets.get(index as usize).ok_or_else(|| {
            CodecError::CorruptedFile(format!(
                "offset table has {} entries for frame {}",
                offsets.len(),
                index
            ))
        })?;
        (start, offsets.get(index as usize + 1).copied().unwrap_or(u64::MAX))
    };

    let mut data = Vec::new();
    let mut position = 0u64;
    for fragment in fragments {
        if position >= start && position < end {
            data.extend_from_slice(fragment.data()?);
        }
        position += ITEM_HEADER_LENGTH + fragment.len() as u64;
    }
    if data.is_empty() {
        return Err(CodecError::CorruptedFile(format!(
            "no fragment starts at offset {} for frame {}",
            start, index
        )));
    }
    Ok(data)
}

/// Decodes frame `index` with the codec registered for the dataset's transfer syntax.
pub fn decode_frame(dataset: &Dataset, index: u32, registry: &CodecRegistry) -> CommonResult<Frame> {
    let count = dataset.frame_count();
    if index >= count {
        return Err(CodecError::FrameNotFound(index));
    }
    let layout = layout_from(dataset)?;
    let codec = registry.codec_for(&layout.transfer_syntax)?;
    let element = dataset
        .element(PIXEL_DATA.0, PIXEL_DATA.1)
        .ok_or(CodecError::MissingElement(PIXEL_DATA.0, PIXEL_DATA.1))?;

    let data = if codec.is_encapsulated(&layout.transfer_syntax) {
        encapsulated_frame(element, index, count)?
    } else {
        let frame_bytes = layout.frame_bytes();
        let start = index as usize * frame_bytes;
        element
            .data()?
            .get(start..start + frame_bytes)
            .ok_or_else(|| {
                CodecError::CorruptedFile(format!(
                    "pixel data is too short for frame {} of {} bytes",
                    index, frame_bytes
                ))
            })?
            .to_vec()
    };

    tracing::debug!(index, codec = codec.name(), bytes = data.len(), "decoding frame");
    codec.decode(&data, &layout)
}

/// Replaces the pixel data of `dataset` with `frames` stored in
/// `options.transfer_syntax`, and rewrites the attributes describing them.
pub fn encode_frames(
    dataset: &mut Dataset,
    frames: &[Frame],
    options: &EncodeOptions,
    registry: &CodecRegistry,
) -> CommonResult<()> {
    let first = frames
        .first()
        .ok_or_else(|| CodecError::InvalidValue("no frames to encode".to_string()))?;
    let same_shape = |frame: &Frame| {
        frame.width == first.width
            && frame.height == first.height
            && frame.channels == first.channels
            && frame.bit_depth == first.bit_depth
            && frame.signed == first.signed
    };
    if !frames.iter().all(same_shape) {
        return Err(CodecError::InvalidValue(
            "frames differ in size, channels or depth".to_string(),
        ));
    }

    let transfer_syntax = options.transfer_syntax.as_str();
    let codec = registry.codec_for(transfer_syntax)?;
    let high_bit = first.high_bit();
    let layout = FrameLayout {
        width: first.width,
        height: first.height,
        channels: first.channels,
        bits_allocated: codec.suggest_allocated_bits(transfer_syntax, high_bit),
        bits_stored: high_bit + 1,
        high_bit,
        signed: first.signed,
        planar: options.planar && first.channels > 1,
        color_space: codec.encoded_color_space(transfer_syntax, &first.color_space, options),
        transfer_syntax: transfer_syntax.to_string(),
    };

    let encoded = frames
        .iter()
        .map(|frame| codec.encode(frame, &layout, options))
        .collect::<CommonResult<Vec<Vec<u8>>>>()?;

    let element = if codec.is_encapsulated(transfer_syntax) {
        let mut table = Vec::with_capacity(encoded.len() * 4);
        let mut buffers = Vec::with_capacity(encoded.len() + 1);
        let mut position = 0u64;
        for mut fragment in encoded {
            let offset = u32::try_from(position).map_err(|_| {
                CodecError::InvalidValue("encapsulated pixel data exceeds 4 GiB".to_string())
            })?;
            table.extend_from_slice(&offset.to_le_bytes());
            if fragment.len() % 2 == 1 {
                fragment.push(0);
            }
            position += ITEM_HEADER_LENGTH + fragment.len() as u64;
            buffers.push(Buffer::new(Vr::OB, fragment));
        }
        buffers.insert(0, Buffer::new(Vr::OB, table));
        DataElement::new(Vr::OB, buffers)
    } else {
        let vr = if layout.bits_allocated > 8 { Vr::OW } else { Vr::OB };
        DataElement::from_bytes(vr, encoded.concat())
    };

    dataset.set_unsigned(ROWS.0, ROWS.1, Vr::US, layout.height)?;
    dataset.set_unsigned(COLUMNS.0, COLUMNS.1, Vr::US, layout.width)?;
    dataset.set_unsigned(SAMPLES_PER_PIXEL.0, SAMPLES_PER_PIXEL.1, Vr::US, layout.channels)?;
    dataset.set_string(
        PHOTOMETRIC_INTERPRETATION.0,
        PHOTOMETRIC_INTERPRETATION.1,
        Vr::CS,
        &layout.color_space,
    )?;
    dataset.set_string(
        NUMBER_OF_FRAMES.0,
        NUMBER_OF_FRAMES.1,
        Vr::IS,
        &frames.len().to_string(),
    )?;
    if layout.channels > 1 {
        dataset.set_unsigned(
            PLANAR_CONFIGURATION.0,
            PLANAR_CONFIGURATION.1,
            Vr::US,
            layout.planar as u32,
        )?;
    } else {
        dataset.remove(PLANAR_CONFIGURATION.0, PLANAR_CONFIGURATION.1);
    }
    dataset.set_unsigned(BITS_ALLOCATED.0, BITS_ALLOCATED.1, Vr::US, layout.bits_allocated)?;
    dataset.set_unsigned(BITS_STORED.0, BITS_STORED.1, Vr::US, layout.bits_stored)?;
    dataset.set_unsigned(HIGH_BIT.0, HIGH_BIT.1, Vr::US, layout.high_bit)?;
    dataset.set_unsigned(
        PIXEL_REPRESENTATION.0,
        PIXEL_REPRESENTATION.1,
        Vr::US,
        layout.signed as u32,
    )?;
    dataset.set_string(TRANSFER_SYNTAX.0, TRANSFER_SYNTAX.1, Vr::UI, transfer_syntax)?;
    dataset.insert(PIXEL_DATA.0, PIXEL_DATA.1, element);

    tracing::debug!(
        frames = frames.len(),
        codec = codec.name(),
        %transfer_syntax,
        "pixel data encoded"
    );
    Ok(())
}
