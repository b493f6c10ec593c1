//! Pipeline driver configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vstream_core::buffer::{CompressedBuffer, DEFAULT_CAPACITY};
use vstream_core::error::{EngineError, Result};

/// Tuning shared by the decode and encode drivers.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Initial capacity of the compressed buffer (decode input, encode output).
    pub buffer_capacity: usize,
    /// Upper bound the compressed buffer may grow to when one unit or packet
    /// does not fit.
    pub max_buffer_capacity: usize,
    /// Bounded wait per completion poll.
    pub poll_timeout_ms: u64,
    /// Sleep between resubmissions while the device reports busy.
    pub busy_backoff_ms: u64,
    /// Consecutive busy submissions tolerated before giving up.
    pub max_busy_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            max_buffer_capacity: 64 * 1024 * 1024,
            poll_timeout_ms: 100,
            busy_backoff_ms: 2,
            max_busy_retries: 500,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(EngineError::Config("buffer_capacity must be non-zero".into()));
        }
        if self.max_buffer_capacity < self.buffer_capacity {
            return Err(EngineError::Config(format!(
                "max_buffer_capacity {} is below buffer_capacity {}",
                self.max_buffer_capacity, self.buffer_capacity
            )));
        }
        if self.poll_timeout_ms == 0 {
            return Err(EngineError::Config("poll_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Load from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            EngineError::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Double `buffer`, capped at `max_buffer_capacity`.  Returns the new
    /// capacity, or [`EngineError::BufferTooSmall`] once the cap is reached.
    pub fn grow_buffer(&self, buffer: &mut CompressedBuffer) -> Result<usize> {
        let capacity = buffer.capacity();
        if capacity >= self.max_buffer_capacity {
            return Err(EngineError::BufferTooSmall {
                need: capacity.saturating_add(1),
                have: capacity,
            });
        }
        let next = capacity.saturating_mul(2).min(self.max_buffer_capacity);
        buffer.grow(next)?;
        Ok(next)
    }

    #[inline]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    #[inline]
    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }
}
