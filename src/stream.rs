use std::{
    cmp::min,
    fmt,
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::{CodecError, CommonResult};

const CACHE_SIZE: usize = 4096;

/// Random access byte storage shared by every reader windowed onto it.
///
/// `read_at` must be safe to call from several threads at once, which is what
/// lets independent readers (and lazily loaded buffers) address different
/// regions of the same file.
pub trait ByteSource: Send + Sync + fmt::Debug {
    fn len(&self) -> u64;

    /// Reads up to `buf.len()` bytes at `offset`, returning how many were read.
    /// Zero means the offset is at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> CommonResult<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> CommonResult<usize> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let count = min(buf.len(), self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }
}

#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> CommonResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> CommonResult<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "file source lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        let wanted = min(buf.len() as u64, self.len - offset) as usize;
        let mut filled = 0;
        while filled < wanted {
            let read = file.read(&mut buf[filled..wanted])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }
}

/// Fills `buf` completely from `source` at `offset`.
pub fn read_exact_at(source: &dyn ByteSource, offset: u64, buf: &mut [u8]) -> CommonResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = source.read_at(offset + filled as u64, &mut buf[filled..])?;
        if read == 0 {
            return Err(CodecError::UnexpectedEndOfStream);
        }
        filled += read;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    /// Converts words of `word_size` bytes between this byte order and the
    /// little endian layout kept in memory. The conversion is its own inverse.
    pub fn adjust(self, data: &mut [u8], word_size: usize) {
        if self == Endian::Little || word_size < 2 {
            return;
        }
        for word in data.chunks_exact_mut(word_size) {
            word.reverse();
        }
    }

    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(bytes),
            Endian::Big => BigEndian::read_u16(bytes),
        }
    }

    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(bytes),
            Endian::Big => BigEndian::read_u32(bytes),
        }
    }

    pub fn write_u16(self, bytes: &mut [u8], value: u16) {
        match self {
            Endian::Little => LittleEndian::write_u16(bytes, value),
            Endian::Big => BigEndian::write_u16(bytes, value),
        }
    }

    pub fn write_u32(self, bytes: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(bytes, value),
            Endian::Big => BigEndian::write_u32(bytes, value),
        }
    }
}

/// Whether `0xFF` bytes in entropy coded data are escaped with a trailing `0x00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerEscape {
    #[default]
    None,
    Jpeg,
}

/// Partial byte state for bit level reads and writes. Only the low `count`
/// bits of `buffer` are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitCursor {
    pub buffer: u32,
    pub count: u32,
}

impl BitCursor {
    pub fn reset(&mut self) {
        self.buffer = 0;
        self.count = 0;
    }

    pub fn is_aligned(&self) -> bool {
        self.count == 0
    }
}

fn low_mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

/// Reader over the window `[start, start + length)` of a shared source.
/// Positions reported by the reader are relative to the window start.
#[derive(Debug)]
pub struct StreamReader {
    source: Arc<dyn ByteSource>,
    start: u64,
    length: u64,
    position: u64,
    cache: Vec<u8>,
    cache_start: u64,
    cursor: BitCursor,
    escape: MarkerEscape,
}

impl StreamReader {
    pub fn new(source: Arc<dyn ByteSource>, escape: MarkerEscape) -> Self {
        let length = source.len();
        Self::windowed(source, 0, length, escape)
    }

    pub fn from_bytes(data: Vec<u8>, escape: MarkerEscape) -> Self {
        Self::new(Arc::new(MemorySource::new(data)), escape)
    }

    pub fn windowed(
        source: Arc<dyn ByteSource>,
        start: u64,
        length: u64,
        escape: MarkerEscape,
    ) -> Self {
        let available = source.len().saturating_sub(start);

        Self {
            source,
            start,
            length: min(length, available),
            position: 0,
            cache: Vec::new(),
            cache_start: 0,
            cursor: BitCursor::default(),
            escape,
        }
    }

    /// Another reader over `[position, position + length)` of this window.
    pub fn sub_window(&self, position: u64, length: u64, escape: MarkerEscape) -> Self {
        let start = self.start + min(position, self.length);
        let length = min(length, self.length.saturating_sub(position));
        Self::windowed(self.source.clone(), start, length, escape)
    }

    pub fn source(&self) -> Arc<dyn ByteSource> {
        self.source.clone()
    }

    pub fn escape(&self) -> MarkerEscape {
        self.escape
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Position in the underlying source.
    pub fn absolute_position(&self) -> u64 {
        self.start + self.position
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn remaining(&self) -> u64 {
        self.length - self.position
    }

    /// Peeks without consuming.
    pub fn end_of_stream(&self) -> bool {
        self.position >= self.length
    }

    pub fn seek(&mut self, position: u64) -> CommonResult<()> {
        if position > self.length {
            return Err(CodecError::UnexpectedEndOfStream);
        }
        self.position = position;
        self.cursor.reset();
        Ok(())
    }

    pub fn skip(&mut self, count: u64) -> CommonResult<()> {
        self.seek(self.position + count)
    }

    fn cache_contains(&self, position: u64) -> bool {
        position >= self.cache_start && position < self.cache_start + self.cache.len() as u64
    }

    fn refill(&mut self) -> CommonResult<()> {
        let wanted = min(CACHE_SIZE as u64, self.remaining()) as usize;
        self.cache.resize(wanted, 0);
        read_exact_at(
            self.source.as_ref(),
            self.start + self.position,
            &mut self.cache,
        )?;
        self.cache_start = self.position;
        Ok(())
    }

    fn next_raw(&mut self) -> CommonResult<u8> {
        if self.end_of_stream() {
            return Err(CodecError::UnexpectedEndOfStream);
        }
        if !self.cache_contains(self.position) {
            self.refill()?;
        }
        let value = self.cache[(self.position - self.cache_start) as usize];
        self.position += 1;
        Ok(value)
    }

    /// Reads exactly `buf.len()` bytes, ignoring the marker escape.
    pub fn read(&mut self, buf: &mut [u8]) -> CommonResult<()> {
        if (buf.len() as u64) > self.remaining() {
            return Err(CodecError::UnexpectedEndOfStream);
        }
        let mut filled = 0;
        while filled < buf.len() {
            if self.cache_contains(self.position) {
                let cache_offset = (self.position - self.cache_start) as usize;
                let count = min(buf.len() - filled, self.cache.len() - cache_offset);
                buf[filled..filled + count]
                    .copy_from_slice(&self.cache[cache_offset..cache_offset + count]);
                filled += count;
                self.position += count as u64;
            } else if buf.len() - filled >= CACHE_SIZE {
                read_exact_at(
                    self.source.as_ref(),
                    self.start + self.position,
                    &mut buf[filled..],
                )?;
                self.position += (buf.len() - filled) as u64;
                filled = buf.len();
            } else {
                self.refill()?;
            }
        }
        Ok(())
    }

    pub fn read_vec(&mut self, count: usize) -> CommonResult<Vec<u8>> {
        let mut data = vec![0u8; count];
        self.read(&mut data)?;
        Ok(data)
    }

    pub fn read_u8(&mut self) -> CommonResult<u8> {
        self.next_raw()
    }

    pub fn read_u16(&mut self, endian: Endian) -> CommonResult<u16> {
        let mut bytes = [0u8; 2];
        self.read(&mut bytes)?;
        Ok(endian.read_u16(&bytes))
    }

    pub fn read_u32(&mut self, endian: Endian) -> CommonResult<u32> {
        let mut bytes = [0u8; 4];
        self.read(&mut bytes)?;
        Ok(endian.read_u32(&bytes))
    }

    /// Reads one byte of entropy coded data.
    ///
    /// With `MarkerEscape::Jpeg`, `FF 00` yields `FF`, fill bytes `FF FF` are
    /// skipped and `FF xx` fails with `UnexpectedMarker(xx)`, leaving the
    /// reader on the `FF` that introduces the marker.
    pub fn read_byte(&mut self) -> CommonResult<u8> {
        let value = self.next_raw()?;
        if self.escape == MarkerEscape::None || value != 0xFF {
            return Ok(value);
        }
        loop {
            let next = self.next_raw()?;
            match next {
                0x00 => return Ok(0xFF),
                0xFF => continue,
                marker => {
                    self.position -= 2;
                    return Err(CodecError::UnexpectedMarker(marker));
                }
            }
        }
    }

    /// Reads `count` bits (at most 32), most significant first.
    pub fn read_bits(&mut self, count: u32) -> CommonResult<u32> {
        let mut needed = min(count, 32);
        let mut result: u64 = 0;
        while needed > 0 {
            if self.cursor.count == 0 {
                self.cursor.buffer = self.read_byte()? as u32;
                self.cursor.count = 8;
            }
            let take = min(needed, self.cursor.count);
            let shift = self.cursor.count - take;
            let bits = (self.cursor.buffer >> shift) & low_mask(take);
            result = (result << take) | bits as u64;
            self.cursor.count -= take;
            self.cursor.buffer &= low_mask(self.cursor.count);
            needed -= take;
        }
        Ok(result as u32)
    }

    pub fn read_bit(&mut self) -> CommonResult<u32> {
        if self.cursor.count == 0 {
            self.cursor.buffer = self.read_byte()? as u32;
            self.cursor.count = 8;
        }
        self.cursor.count -= 1;
        Ok((self.cursor.buffer >> self.cursor.count) & 1)
    }

    /// Drops the rest of a partially consumed byte.
    pub fn reset_bit_cursor(&mut self) {
        self.cursor.reset();
    }
}

/// Writer mirroring `StreamReader`. `base` is the absolute offset of the first
/// byte written, used for positions reported to nested structures.
#[derive(Debug)]
pub struct StreamWriter<W: Write> {
    inner: W,
    base: u64,
    position: u64,
    cursor: BitCursor,
    escape: MarkerEscape,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, escape: MarkerEscape) -> Self {
        Self::windowed(inner, 0, escape)
    }

    pub fn windowed(inner: W, base: u64, escape: MarkerEscape) -> Self {
        Self {
            inner,
            base,
            position: 0,
            cursor: BitCursor::default(),
            escape,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn absolute_position(&self) -> u64 {
        self.base + self.position
    }

    /// Writes bytes verbatim, ignoring the marker escape.
    pub fn write(&mut self, data: &[u8]) -> CommonResult<()> {
        self.inner.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> CommonResult<()> {
        self.write(&[value])
    }

    pub fn write_u16(&mut self, value: u16, endian: Endian) -> CommonResult<()> {
        let mut bytes = [0u8; 2];
        endian.write_u16(&mut bytes, value);
        self.write(&bytes)
    }

    pub fn write_u32(&mut self, value: u32, endian: Endian) -> CommonResult<()> {
        let mut bytes = [0u8; 4];
        endian.write_u32(&mut bytes, value);
        self.write(&bytes)
    }

    /// Writes one byte of entropy coded data, stuffing `00` after `FF` when
    /// escaping.
    pub fn write_byte(&mut self, value: u8) -> CommonResult<()> {
        if self.escape == MarkerEscape::Jpeg && value == 0xFF {
            self.write(&[0xFF, 0x00])
        } else {
            self.write(&[value])
        }
    }

    /// Writes the low `count` bits of `value` (at most 32), most significant first.
    pub fn write_bits(&mut self, value: u32, count: u32) -> CommonResult<()> {
        let mut pending = min(count, 32);
        while pending > 0 {
            let take = min(pending, 8 - self.cursor.count);
            let bits = (value >> (pending - take)) & low_mask(take);
            self.cursor.buffer = (self.cursor.buffer << take) | bits;
            self.cursor.count += take;
            pending -= take;
            if self.cursor.count == 8 {
                let byte = self.cursor.buffer as u8;
                self.cursor.reset();
                self.write_byte(byte)?;
            }
        }
        Ok(())
    }

    /// Pads the pending partial byte with 1 bits and writes it.
    pub fn flush_bits(&mut self) -> CommonResult<()> {
        if self.cursor.count == 0 {
            return Ok(());
        }
        let padding = 8 - self.cursor.count;
        let byte = ((self.cursor.buffer << padding) | low_mask(padding)) as u8;
        self.cursor.reset();
        self.write_byte(byte)
    }

    pub fn flush(&mut self) -> CommonResult<()> {
        self.flush_bits()?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
