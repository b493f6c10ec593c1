#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod codec_traits;
pub mod error;
pub mod frame;
pub mod plane;
pub mod transfer;
pub mod types;

pub use buffer::{CompressedBuffer, RefillStatus};
pub use error::{EngineError, Result};
pub use transfer::{TransferStatus, read_raw_frame, write_raw_frame};
pub use types::{EncodeConfig, FormatDescription, FrameInfo, MapAccess, PixelLayout};
