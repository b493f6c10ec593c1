#![doc = include_str!("../README.md")]

pub mod file_sink;
pub mod file_source;

pub use file_sink::FileByteSink;
pub use file_source::FileByteSource;
