use std::io;

use thiserror::Error;

pub type CommonResult<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The byte stream does not carry the expected signature. A dispatcher may
    /// try another codec when it sees this variant, and only this one.
    #[error("unrecognized format: {0}")]
    UnrecognizedFormat(String),

    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    #[error("nesting depth {depth} exceeds the maximum of {max}")]
    NestingDepthExceeded { depth: u32, max: u32 },

    #[error("unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),

    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    /// Raised by an escape-aware reader when it meets `0xFF xx`. The reader is
    /// left positioned on the `0xFF` so the marker parser can pick it up.
    #[error("unexpected marker 0xFF{0:02X}")]
    UnexpectedMarker(u8),

    #[error("invalid huffman code")]
    InvalidHuffmanCode,

    #[error("symbol {0} has no huffman code")]
    UnencodableSymbol(u32),

    #[error("corrupted jpeg stream: {0}")]
    CorruptedJpegStream(String),

    #[error("unsupported jpeg encoding process SOF{0}")]
    UnsupportedSof(u8),

    #[error("truncated rle segment: {0}")]
    TruncatedRleSegment(String),

    #[error("at tag ({group:04X},{element:04X}) offset {offset}: {source}")]
    AtTag {
        group: u16,
        element: u16,
        offset: u64,
        #[source]
        source: Box<CodecError>,
    },

    #[error("element ({0:04X},{1:04X}) not found")]
    MissingElement(u16, u16),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("frame {0} not found")]
    FrameNotFound(u32),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl CodecError {
    pub fn at_tag(self, group: u16, element: u16, offset: u64) -> Self {
        CodecError::AtTag {
            group,
            element,
            offset,
            source: Box::new(self),
        }
    }

    /// The innermost error, without the positional wrappers.
    pub fn root(&self) -> &CodecError {
        let mut current = self;
        while let CodecError::AtTag { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn is_unrecognized_format(&self) -> bool {
        matches!(self.root(), CodecError::UnrecognizedFormat(_))
    }

    /// True for failures caused by damaged data rather than by the caller.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self.root(),
            CodecError::CorruptedFile(_)
                | CodecError::InvalidHuffmanCode
                | CodecError::CorruptedJpegStream(_)
                | CodecError::TruncatedRleSegment(_)
                | CodecError::UnexpectedEndOfStream
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_positional_context() {
        let err = CodecError::InvalidHuffmanCode
            .at_tag(0x7FE0, 0x0010, 132)
            .at_tag(0x0040, 0x0275, 80);

        assert!(matches!(err.root(), CodecError::InvalidHuffmanCode));
        assert!(err.is_corruption());
        assert!(!err.is_unrecognized_format());
        assert!(err.to_string().contains("(0040,0275)"));
    }

    #[test]
    fn unrecognized_format_is_detectable_through_wrappers() {
        let err = CodecError::UnrecognizedFormat("no DICM".into()).at_tag(2, 0x10, 0);
        assert!(err.is_unrecognized_format());
    }
}
