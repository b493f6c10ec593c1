//! Typed error hierarchy shared by every vstream crate.
//!
//! Uses `thiserror` for library-grade errors.  Stream-exhaustion signals
//! (end of source, need-more-input, partial frames) are *not* errors; they
//! are carried as status values by the components that produce them.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! so the CLI can exit with a meaningful status without string parsing.

use crate::types::PixelLayout;

/// All errors originating from the buffer manager, frame transfer, codec
/// engines and pipeline drivers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Contract violations ──────────────────────────────────────────
    #[error(
        "Compressed buffer overflow: offset {offset} + length {length} exceeds capacity {capacity}"
    )]
    BufferOverflow {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid frame geometry: {0}")]
    InvalidFrame(String),

    #[error("Frame layout mismatch: expected {expected:?}, got {actual:?}")]
    LayoutMismatch {
        expected: PixelLayout,
        actual: PixelLayout,
    },

    #[error("Frame is not mapped for {0} access")]
    NotMapped(&'static str),

    // ── Codec engine ─────────────────────────────────────────────────
    #[error("Codec engine not initialized; call init() first")]
    NotInitialized,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("No sequence header found before end of stream")]
    MissingHeader,

    #[error("Codec device lost")]
    DeviceLost,

    #[error("Codec device stayed busy for {attempts} consecutive submissions")]
    BusyTimeout { attempts: u32 },

    #[error("Stream parameters incompatible with the initialized session")]
    IncompatibleParams,

    #[error("Unrecognized codec engine status {0}")]
    UnknownStatus(i32),

    #[error("Completion poll failed with status {0}")]
    Poll(i32),

    #[error("Surface pool exhausted ({capacity} surfaces in flight)")]
    SurfacesExhausted { capacity: usize },

    // ── I/O ──────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Sink error: {0}")]
    Sink(String),

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable integer error code for process exit status and telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: contract violations
    /// - 2xx: codec engine
    /// - 3xx: I/O
    /// - 4xx: configuration
    pub fn error_code(&self) -> u32 {
        match self {
            Self::BufferOverflow { .. } => 100,
            Self::BufferTooSmall { .. } => 101,
            Self::UnsupportedFormat(_) => 102,
            Self::InvalidFrame(_) => 103,
            Self::LayoutMismatch { .. } => 104,
            Self::NotMapped(_) => 105,
            Self::NotInitialized => 200,
            Self::Decode(_) => 201,
            Self::Encode(_) => 202,
            Self::MissingHeader => 203,
            Self::DeviceLost => 204,
            Self::BusyTimeout { .. } => 205,
            Self::IncompatibleParams => 206,
            Self::UnknownStatus(_) => 207,
            Self::Poll(_) => 208,
            Self::SurfacesExhausted { .. } => 209,
            Self::Io(_) => 300,
            Self::Source(_) => 301,
            Self::Sink(_) => 302,
            Self::Config(_) => 400,
        }
    }

    /// Whether a caller may retry the same operation after this error.
    ///
    /// Only transient engine conditions qualify; everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BusyTimeout { .. } | Self::SurfacesExhausted { .. }
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;
