//! Reading, writing and transcoding of DICOM files and their pixel data.

pub mod codec;
pub mod config;
pub mod dicom;
pub mod dictionary;
pub mod error;
pub mod frame;
pub mod huffman;
pub mod model;
pub mod pixel_data;
pub mod stream;
pub mod util;

pub use codec::{CodecRegistry, FrameLayout, PixelCodec};
pub use config::{EncodeOptions, ParseOptions, Quality};
pub use error::{CodecError, CommonResult};
pub use frame::Frame;
pub use model::{DataElement, Dataset};
pub use pixel_data::{decode_frame, encode_frames};
