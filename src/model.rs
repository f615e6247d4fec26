use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, OnceLock},
};

use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::Encoding;

use crate::{
    dictionary::Vr,
    stream::{read_exact_at, ByteSource, Endian},
    CodecError, CommonResult,
};

pub const TRANSFER_SYNTAX: (u16, u16) = (0x0002, 0x0010);
pub const SPECIFIC_CHARACTER_SET: (u16, u16) = (0x0008, 0x0005);

/// Location of a value left in its source until first access.
#[derive(Clone)]
pub struct LazyRange {
    pub source: Arc<dyn ByteSource>,
    pub offset: u64,
    pub length: u64,
    pub word_size: usize,
    pub endian: Endian,
}

impl fmt::Debug for LazyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRange")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("word_size", &self.word_size)
            .field("endian", &self.endian)
            .finish()
    }
}

impl LazyRange {
    fn load(&self) -> CommonResult<Vec<u8>> {
        let mut data = vec![0u8; self.length as usize];
        read_exact_at(self.source.as_ref(), self.offset, &mut data)?;
        self.endian.adjust(&mut data, self.word_size);
        Ok(data)
    }
}

/// Bytes of one value, kept little endian whatever the stream byte order was.
#[derive(Debug, Clone)]
pub struct Buffer {
    vr: Vr,
    data: OnceLock<Vec<u8>>,
    lazy: Option<LazyRange>,
}

impl Buffer {
    pub fn new(vr: Vr, data: Vec<u8>) -> Self {
        Self {
            vr,
            data: OnceLock::from(data),
            lazy: None,
        }
    }

    pub fn lazy(vr: Vr, range: LazyRange) -> Self {
        Self {
            vr,
            data: OnceLock::new(),
            lazy: Some(range),
        }
    }

    pub fn vr(&self) -> Vr {
        self.vr
    }

    pub fn is_loaded(&self) -> bool {
        self.data.get().is_some()
    }

    /// Length in bytes, known without loading a lazy buffer.
    pub fn len(&self) -> usize {
        match (self.data.get(), &self.lazy) {
            (Some(data), _) => data.len(),
            (None, Some(range)) => range.length as usize,
            (None, None) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value bytes, read from the source on first call for lazy buffers.
    pub fn data(&self) -> CommonResult<&[u8]> {
        if let Some(data) = self.data.get() {
            return Ok(data);
        }
        let loaded = match &self.lazy {
            Some(range) => range.load()?,
            None => Vec::new(),
        };
        Ok(self.data.get_or_init(|| loaded))
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        match (self.data(), other.data()) {
            (Ok(left), Ok(right)) => self.vr == other.vr && left == right,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementContent {
    Buffers(Vec<Buffer>),
    Items(Vec<Dataset>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    vr: Vr,
    content: ElementContent,
}

impl DataElement {
    pub fn new(vr: Vr, buffers: Vec<Buffer>) -> Self {
        Self {
            vr,
            content: ElementContent::Buffers(buffers),
        }
    }

    pub fn from_bytes(vr: Vr, data: Vec<u8>) -> Self {
        Self::new(vr, vec![Buffer::new(vr, data)])
    }

    pub fn sequence(items: Vec<Dataset>) -> Self {
        Self {
            vr: Vr::SQ,
            content: ElementContent::Items(items),
        }
    }

    pub fn vr(&self) -> Vr {
        self.vr
    }

    pub fn content(&self) -> &ElementContent {
        &self.content
    }

    pub fn buffers(&self) -> &[Buffer] {
        match &self.content {
            ElementContent::Buffers(buffers) => buffers,
            ElementContent::Items(_) => &[],
        }
    }

    pub fn items(&self) -> &[Dataset] {
        match &self.content {
            ElementContent::Items(items) => items,
            ElementContent::Buffers(_) => &[],
        }
    }

    pub fn items_mut(&mut self) -> Option<&mut Vec<Dataset>> {
        match &mut self.content {
            ElementContent::Items(items) => Some(items),
            ElementContent::Buffers(_) => None,
        }
    }

    pub fn push_buffer(&mut self, buffer: Buffer) -> CommonResult<()> {
        match &mut self.content {
            ElementContent::Buffers(buffers) => {
                buffers.push(buffer);
                Ok(())
            }
            ElementContent::Items(_) => Err(CodecError::InvalidValue(
                "cannot add a buffer to a sequence of items".into(),
            )),
        }
    }

    pub fn push_item(&mut self, item: Dataset) -> CommonResult<()> {
        match &mut self.content {
            ElementContent::Items(items) => {
                items.push(item);
                Ok(())
            }
            ElementContent::Buffers(buffers) if buffers.is_empty() => {
                self.vr = Vr::SQ;
                self.content = ElementContent::Items(vec![item]);
                Ok(())
            }
            ElementContent::Buffers(_) => Err(CodecError::InvalidValue(
                "cannot add an item to an element holding buffers".into(),
            )),
        }
    }

    /// Written with undefined length and item delimiters.
    pub fn is_sequence(&self) -> bool {
        match &self.content {
            ElementContent::Items(_) => true,
            ElementContent::Buffers(buffers) => self.vr == Vr::SQ || buffers.len() > 1,
        }
    }

    /// Bytes of the first buffer.
    pub fn data(&self) -> CommonResult<&[u8]> {
        match self.buffers().first() {
            Some(buffer) => buffer.data(),
            None => Ok(&[]),
        }
    }

    /// Decodes the first buffer according to the VR.
    pub fn value(&self, charset: &'static Encoding) -> CommonResult<DicomValue> {
        if let ElementContent::Items(items) = &self.content {
            return Ok(DicomValue::Sequence(items.clone()));
        }
        let buffer = self.data()?;

        let result = match self.vr {
            Vr::UL => DicomValue::U32(buffer.chunks_exact(4).map(LittleEndian::read_u32).collect()),
            Vr::US => DicomValue::U16(buffer.chunks_exact(2).map(LittleEndian::read_u16).collect()),
            Vr::SL => DicomValue::I32(buffer.chunks_exact(4).map(LittleEndian::read_i32).collect()),
            Vr::SS => DicomValue::I16(buffer.chunks_exact(2).map(LittleEndian::read_i16).collect()),
            Vr::FD | Vr::OD => {
                DicomValue::Double(buffer.chunks_exact(8).map(LittleEndian::read_f64).collect())
            }
            Vr::FL | Vr::OF => {
                DicomValue::Float(buffer.chunks_exact(4).map(LittleEndian::read_f32).collect())
            }
            Vr::AT => DicomValue::Tags(
                buffer
                    .chunks_exact(4)
                    .map(|tag| {
                        (
                            LittleEndian::read_u16(&tag[..2]),
                            LittleEndian::read_u16(&tag[2..]),
                        )
                    })
                    .collect(),
            ),
            Vr::DS => {
                let text = decode_text(buffer, charset);
                let datas = split_values(&text)
                    .into_iter()
                    .filter(|v| !v.is_empty())
                    .map(|v| {
                        v.parse::<f64>()
                            .map_err(|_| CodecError::InvalidValue(format!("bad decimal {:?}", v)))
                    })
                    .collect::<CommonResult<Vec<f64>>>()?;
                DicomValue::Double(datas)
            }
            Vr::IS => {
                let text = decode_text(buffer, charset);
                let datas = split_values(&text)
                    .into_iter()
                    .filter(|v| !v.is_empty())
                    .map(|v| {
                        v.parse::<i32>()
                            .map_err(|_| CodecError::InvalidValue(format!("bad integer {:?}", v)))
                    })
                    .collect::<CommonResult<Vec<i32>>>()?;
                DicomValue::I32(datas)
            }
            vr if vr.is_string() => DicomValue::String(decode_text(buffer, charset)),
            _ => DicomValue::Bytes(buffer.to_vec()),
        };

        Ok(result)
    }
}

/// Decoded element value.
#[derive(Debug, Clone, PartialEq)]
pub enum DicomValue {
    String(String),
    Tags(Vec<(u16, u16)>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    I32(Vec<i32>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    U16(Vec<u16>),
    Bytes(Vec<u8>),
    Sequence(Vec<Dataset>),
}

impl DicomValue {
    /// Number of values held.
    pub fn multiplicity(&self) -> usize {
        match self {
            DicomValue::String(text) => split_values(text).len(),
            DicomValue::Tags(v) => v.len(),
            DicomValue::Float(v) => v.len(),
            DicomValue::Double(v) => v.len(),
            DicomValue::I32(v) => v.len(),
            DicomValue::I16(v) => v.len(),
            DicomValue::U32(v) => v.len(),
            DicomValue::U16(v) => v.len(),
            DicomValue::Bytes(v) => v.len(),
            DicomValue::Sequence(v) => v.len(),
        }
    }

    pub fn as_f64(&self, index: usize) -> Option<f64> {
        match self {
            DicomValue::Float(v) => v.get(index).map(|x| *x as f64),
            DicomValue::Double(v) => v.get(index).copied(),
            DicomValue::I32(v) => v.get(index).map(|x| *x as f64),
            DicomValue::I16(v) => v.get(index).map(|x| *x as f64),
            DicomValue::U32(v) => v.get(index).map(|x| *x as f64),
            DicomValue::U16(v) => v.get(index).map(|x| *x as f64),
            DicomValue::Bytes(v) => v.get(index).map(|x| *x as f64),
            DicomValue::String(text) => split_values(text)
                .get(index)
                .and_then(|v| v.trim().parse::<f64>().ok()),
            DicomValue::Tags(_) | DicomValue::Sequence(_) => None,
        }
    }

    pub fn as_string(&self, index: usize) -> Option<String> {
        match self {
            DicomValue::String(text) => split_values(text).get(index).map(|v| v.to_string()),
            DicomValue::Tags(v) => v
                .get(index)
                .map(|(group, element)| format!("{:04X},{:04X}", group, element)),
            DicomValue::I32(v) => v.get(index).map(|x| x.to_string()),
            DicomValue::I16(v) => v.get(index).map(|x| x.to_string()),
            DicomValue::U32(v) => v.get(index).map(|x| x.to_string()),
            DicomValue::U16(v) => v.get(index).map(|x| x.to_string()),
            DicomValue::Float(v) => v.get(index).map(|x| x.to_string()),
            DicomValue::Double(v) => v.get(index).map(|x| x.to_string()),
            DicomValue::Bytes(_) | DicomValue::Sequence(_) => None,
        }
    }
}

fn decode_text(buffer: &[u8], charset: &'static Encoding) -> String {
    let (result, _, _) = charset.decode(buffer);
    result.trim_end_matches('\0').trim().to_string()
}

fn split_values(text: &str) -> Vec<&str> {
    text.split('\\').map(|v| v.trim()).collect()
}

/// Maps a Specific Character Set term to an encoding.
pub fn encoding_for_charset(term: &str) -> &'static Encoding {
    match term.trim() {
        "ISO_IR 192" => encoding_rs::UTF_8,
        "GB18030" => encoding_rs::GB18030,
        "GBK" => encoding_rs::GBK,
        "ISO_IR 101" | "ISO 2022 IR 101" => encoding_rs::ISO_8859_2,
        "ISO_IR 109" | "ISO 2022 IR 109" => encoding_rs::ISO_8859_3,
        "ISO_IR 110" | "ISO 2022 IR 110" => encoding_rs::ISO_8859_4,
        "ISO_IR 144" | "ISO 2022 IR 144" => encoding_rs::ISO_8859_5,
        "ISO_IR 127" | "ISO 2022 IR 127" => encoding_rs::ISO_8859_6,
        "ISO_IR 126" | "ISO 2022 IR 126" => encoding_rs::ISO_8859_7,
        "ISO_IR 138" | "ISO 2022 IR 138" => encoding_rs::ISO_8859_8,
        "ISO_IR 148" | "ISO 2022 IR 148" => encoding_rs::WINDOWS_1254,
        "ISO_IR 166" | "ISO 2022 IR 166" => encoding_rs::WINDOWS_874,
        "ISO_IR 13" | "ISO 2022 IR 13" => encoding_rs::SHIFT_JIS,
        "ISO 2022 IR 149" => encoding_rs::EUC_KR,
        _ => encoding_rs::WINDOWS_1252,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    elements: BTreeMap<u16, DataElement>,
}

impl Group {
    pub fn element(&self, element: u16) -> Option<&DataElement> {
        self.elements.get(&element)
    }

    pub fn elements(&self) -> impl Iterator<Item = (u16, &DataElement)> {
        self.elements.iter().map(|(id, element)| (*id, element))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Groups of elements keyed by `(group, repetition order)`.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    groups: BTreeMap<(u16, u16), Group>,
    item_offset: u64,
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        let left = self.groups.iter().filter(|(_, group)| !group.is_empty());
        let right = other.groups.iter().filter(|(_, group)| !group.is_empty());
        left.eq(right)
    }
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute stream offset of the item tag this dataset was read from.
    pub fn item_offset(&self) -> u64 {
        self.item_offset
    }

    pub fn set_item_offset(&mut self, offset: u64) {
        self.item_offset = offset;
    }

    pub fn groups(&self) -> impl Iterator<Item = ((u16, u16), &Group)> {
        self.groups.iter().map(|(key, group)| (*key, group))
    }

    pub fn group(&self, group: u16, order: u16) -> Option<&Group> {
        self.groups.get(&(group, order))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Group::is_empty)
    }

    pub fn element(&self, group: u16, element: u16) -> Option<&DataElement> {
        self.element_at(group, 0, element)
    }

    pub fn element_at(&self, group: u16, order: u16, element: u16) -> Option<&DataElement> {
        self.groups.get(&(group, order))?.elements.get(&element)
    }

    pub fn element_mut(&mut self, group: u16, element: u16) -> Option<&mut DataElement> {
        self.groups.get_mut(&(group, 0))?.elements.get_mut(&element)
    }

    pub fn contains(&self, group: u16, element: u16) -> bool {
        self.element(group, element).is_some()
    }

    pub fn insert(&mut self, group: u16, element: u16, data: DataElement) {
        self.insert_at(group, 0, element, data);
    }

    pub fn insert_at(&mut self, group: u16, order: u16, element: u16, data: DataElement) {
        self.groups
            .entry((group, order))
            .or_default()
            .elements
            .insert(element, data);
    }

    pub fn remove(&mut self, group: u16, element: u16) -> Option<DataElement> {
        let groups = self.groups.get_mut(&(group, 0))?;
        let removed = groups.elements.remove(&element);
        if groups.is_empty() {
            self.groups.remove(&(group, 0));
        }
        removed
    }

    pub(crate) fn entry_at(&mut self, group: u16, order: u16, element: u16, vr: Vr) -> &mut DataElement {
        self.groups
            .entry((group, order))
            .or_default()
            .elements
            .entry(element)
            .or_insert_with(|| DataElement::new(vr, Vec::new()))
    }

    fn required(&self, group: u16, element: u16) -> CommonResult<&DataElement> {
        self.element(group, element)
            .ok_or(CodecError::MissingElement(group, element))
    }

    pub fn charset(&self) -> &'static Encoding {
        let Some(element) = self.element(SPECIFIC_CHARACTER_SET.0, SPECIFIC_CHARACTER_SET.1) else {
            return encoding_rs::WINDOWS_1252;
        };
        let Ok(data) = element.data() else {
            return encoding_rs::WINDOWS_1252;
        };
        let text = String::from_utf8_lossy(data);
        let term = text
            .split('\\')
            .map(|v| v.trim_matches(|c: char| c == ' ' || c == '\0'))
            .find(|v| !v.is_empty())
            .unwrap_or("");
        encoding_for_charset(term)
    }

    pub fn transfer_syntax(&self) -> Option<String> {
        self.get_string(TRANSFER_SYNTAX.0, TRANSFER_SYNTAX.1, 0).ok()
    }

    pub fn value(&self, group: u16, element: u16) -> CommonResult<DicomValue> {
        self.required(group, element)?.value(self.charset())
    }

    pub fn get_string(&self, group: u16, element: u16, index: usize) -> CommonResult<String> {
        self.value(group, element)?
            .as_string(index)
            .ok_or_else(|| CodecError::InvalidValue(format!("no string value at index {}", index)))
    }

    pub fn get_double(&self, group: u16, element: u16, index: usize) -> CommonResult<f64> {
        self.value(group, element)?
            .as_f64(index)
            .ok_or_else(|| CodecError::InvalidValue(format!("no numeric value at index {}", index)))
    }

    pub fn get_unsigned(&self, group: u16, element: u16, index: usize) -> CommonResult<u32> {
        let value = self.get_double(group, element, index)?;
        if value < 0.0 || value > u32::MAX as f64 {
            return Err(CodecError::InvalidValue(format!("{} is not unsigned", value)));
        }
        Ok(value as u32)
    }

    pub fn get_signed(&self, group: u16, element: u16, index: usize) -> CommonResult<i32> {
        let value = self.get_double(group, element, index)?;
        if value < i32::MIN as f64 || value > i32::MAX as f64 {
            return Err(CodecError::InvalidValue(format!("{} does not fit i32", value)));
        }
        Ok(value as i32)
    }

    pub fn set_bytes(&mut self, group: u16, element: u16, vr: Vr, data: Vec<u8>) {
        self.insert(group, element, DataElement::from_bytes(vr, data));
    }

    /// Stores text, padded to even length with the VR padding byte.
    pub fn set_string(&mut self, group: u16, element: u16, vr: Vr, value: &str) -> CommonResult<()> {
        if !vr.is_string() {
            return match vr {
                Vr::FL | Vr::FD | Vr::OF | Vr::OD => {
                    let parsed = value.trim().parse::<f64>().map_err(|_| {
                        CodecError::InvalidValue(format!("{:?} is not a number", value))
                    })?;
                    self.set_double(group, element, vr, parsed)
                }
                _ => {
                    let parsed = value.trim().parse::<i64>().map_err(|_| {
                        CodecError::InvalidValue(format!("{:?} is not an integer", value))
                    })?;
                    self.set_integer(group, element, vr, parsed)
                }
            };
        }
        let (encoded, _, _) = self.charset().encode(value);
        let mut data = encoded.into_owned();
        if vr.max_length() != 0 && data.len() > vr.max_length() * (value.matches('\\').count() + 1) {
            return Err(CodecError::InvalidValue(format!(
                "{:?} is too long for {}",
                value, vr
            )));
        }
        if data.len() % 2 == 1 {
            data.push(vr.padding_byte());
        }
        self.set_bytes(group, element, vr, data);
        Ok(())
    }

    pub fn set_unsigned(&mut self, group: u16, element: u16, vr: Vr, value: u32) -> CommonResult<()> {
        self.set_integer(group, element, vr, value as i64)
    }

    pub fn set_signed(&mut self, group: u16, element: u16, vr: Vr, value: i32) -> CommonResult<()> {
        self.set_integer(group, element, vr, value as i64)
    }

    fn set_integer(&mut self, group: u16, element: u16, vr: Vr, value: i64) -> CommonResult<()> {
        let out_of_range = || CodecError::InvalidValue(format!("{} does not fit {}", value, vr));
        let data = match vr {
            Vr::US | Vr::OW => {
                let mut data = vec![0u8; 2];
                LittleEndian::write_u16(&mut data, u16::try_from(value).map_err(|_| out_of_range())?);
                data
            }
            Vr::SS => {
                let mut data = vec![0u8; 2];
                LittleEndian::write_i16(&mut data, i16::try_from(value).map_err(|_| out_of_range())?);
                data
            }
            Vr::UL | Vr::OL => {
                let mut data = vec![0u8; 4];
                LittleEndian::write_u32(&mut data, u32::try_from(value).map_err(|_| out_of_range())?);
                data
            }
            Vr::SL => {
                let mut data = vec![0u8; 4];
                LittleEndian::write_i32(&mut data, i32::try_from(value).map_err(|_| out_of_range())?);
                data
            }
            Vr::OB | Vr::UN => vec![u8::try_from(value).map_err(|_| out_of_range())?, 0],
            Vr::FL | Vr::FD | Vr::OF | Vr::OD => return self.set_double(group, element, vr, value as f64),
            vr if vr.is_string() => return self.set_string(group, element, vr, &value.to_string()),
            _ => return Err(out_of_range()),
        };
        self.set_bytes(group, element, vr, data);
        Ok(())
    }

    pub fn set_double(&mut self, group: u16, element: u16, vr: Vr, value: f64) -> CommonResult<()> {
        let data = match vr {
            Vr::FL | Vr::OF => {
                let mut data = vec![0u8; 4];
                LittleEndian::write_f32(&mut data, value as f32);
                data
            }
            Vr::FD | Vr::OD => {
                let mut data = vec![0u8; 8];
                LittleEndian::write_f64(&mut data, value);
                data
            }
            Vr::DS => return self.set_string(group, element, vr, &format_decimal(value)),
            _ if value.fract() == 0.0 => return self.set_integer(group, element, vr, value as i64),
            _ => {
                return Err(CodecError::InvalidValue(format!(
                    "{} cannot be stored as {}",
                    value, vr
                )))
            }
        };
        self.set_bytes(group, element, vr, data);
        Ok(())
    }

    /// Appends an item to the sequence, creating the element if needed.
    pub fn add_sequence_item(&mut self, group: u16, element: u16, item: Dataset) -> CommonResult<()> {
        self.entry_at(group, 0, element, Vr::SQ).push_item(item)
    }

    pub fn sequence_item(&self, group: u16, element: u16, index: usize) -> Option<&Dataset> {
        self.element(group, element)?.items().get(index)
    }
}

/// Formats a decimal string within the 16 byte DS limit.
fn format_decimal(value: f64) -> String {
    let text = value.to_string();
    if text.len() <= 16 {
        return text;
    }
    for precision in (0..16).rev() {
        let text = format!("{:.*e}", precision, value);
        if text.len() <= 16 {
            return text;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemorySource;

    #[test]
    fn typed_setters_and_getters() {
        let mut dataset = Dataset::new();
        dataset.set_unsigned(0x0028, 0x0010, Vr::US, 512).unwrap();
        dataset.set_signed(0x0028, 0x0106, Vr::SS, -3).unwrap();
        dataset.set_double(0x0028, 0x1050, Vr::DS, 40.5).unwrap();
        dataset.set_string(0x0010, 0x0010, Vr::PN, "Doe^John").unwrap();
        dataset.set_string(0x0008, 0x0018, Vr::UI, "1.2.3").unwrap();

        assert_eq!(dataset.get_unsigned(0x0028, 0x0010, 0).unwrap(), 512);
        assert_eq!(dataset.get_string(0x0028, 0x0010, 0).unwrap(), "512");
        assert_eq!(dataset.get_signed(0x0028, 0x0106, 0).unwrap(), -3);
        assert_eq!(dataset.get_double(0x0028, 0x1050, 0).unwrap(), 40.5);
        assert_eq!(dataset.get_string(0x0010, 0x0010, 0).unwrap(), "Doe^John");
        // odd length UI padded with NUL, trimmed on read
        assert_eq!(dataset.element(0x0008, 0x0018).unwrap().data().unwrap(), b"1.2.3\0");
        assert_eq!(dataset.get_string(0x0008, 0x0018, 0).unwrap(), "1.2.3");
        assert!(matches!(
            dataset.get_string(0x0010, 0x0020, 0),
            Err(CodecError::MissingElement(0x0010, 0x0020))
        ));
    }

    #[test]
    fn multi_valued_strings() {
        let mut dataset = Dataset::new();
        dataset.set_string(0x0008, 0x0008, Vr::CS, "ORIGINAL\\PRIMARY").unwrap();

        assert_eq!(dataset.get_string(0x0008, 0x0008, 1).unwrap(), "PRIMARY");
        assert_eq!(dataset.value(0x0008, 0x0008).unwrap().multiplicity(), 2);
    }

    #[test]
    fn unsigned_range_is_checked() {
        let mut dataset = Dataset::new();
        assert!(dataset.set_unsigned(0x0028, 0x0010, Vr::US, 70_000).is_err());
        assert!(dataset.set_string(0x0008, 0x0050, Vr::SH, "x".repeat(17).as_str()).is_err());
    }

    #[test]
    fn charset_selects_decoder() {
        let mut dataset = Dataset::new();
        dataset.set_bytes(0x0008, 0x0005, Vr::CS, b"ISO_IR 192".to_vec());
        dataset.set_string(0x0010, 0x0010, Vr::PN, "Zoë").unwrap();

        assert_eq!(dataset.charset(), encoding_rs::UTF_8);
        assert_eq!(dataset.get_string(0x0010, 0x0010, 0).unwrap(), "Zoë");
    }

    #[test]
    fn sequences_hold_items() {
        let mut item = Dataset::new();
        item.set_unsigned(0x0008, 0x1160, Vr::IS, 7).unwrap();
        let mut dataset = Dataset::new();
        dataset.add_sequence_item(0x0008, 0x1140, item.clone()).unwrap();
        dataset.add_sequence_item(0x0008, 0x1140, Dataset::new()).unwrap();

        let element = dataset.element(0x0008, 0x1140).unwrap();
        assert!(element.is_sequence());
        assert_eq!(element.items().len(), 2);
        assert_eq!(dataset.sequence_item(0x0008, 0x1140, 0), Some(&item));
        assert_eq!(
            dataset.sequence_item(0x0008, 0x1140, 0).unwrap().get_signed(0x0008, 0x1160, 0).unwrap(),
            7
        );
    }

    #[test]
    fn lazy_buffer_loads_and_swaps_on_first_access() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(vec![9, 9, 0x02, 0x00, 0x01, 0x00]));
        let buffer = Buffer::lazy(
            Vr::US,
            LazyRange {
                source,
                offset: 2,
                length: 4,
                word_size: 2,
                endian: Endian::Big,
            },
        );

        assert!(!buffer.is_loaded());
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.data().unwrap(), &[0x00, 0x02, 0x00, 0x01]);
        assert!(buffer.is_loaded());
    }

    #[test]
    fn removing_last_element_drops_group() {
        let mut dataset = Dataset::new();
        dataset.set_unsigned(0x0028, 0x0010, Vr::US, 1).unwrap();
        assert!(dataset.remove(0x0028, 0x0010).is_some());
        assert!(dataset.is_empty());
        assert_eq!(dataset, Dataset::new());
    }
}
