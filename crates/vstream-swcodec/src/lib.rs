#![doc = include_str!("../README.md")]

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod surface;
pub mod syntax;

pub use config::SwEngineConfig;
pub use decoder::SwDecoder;
pub use encoder::SwEncoder;
pub use surface::{SurfacePool, SwSurface};
