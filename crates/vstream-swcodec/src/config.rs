//! Software engine tuning shared by the decoder and the encoder.

use serde::{Deserialize, Serialize};

use vstream_core::error::{EngineError, Result};

/// Tuning knobs for [`SwDecoder`](crate::decoder::SwDecoder) and
/// [`SwEncoder`](crate::encoder::SwEncoder).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwEngineConfig {
    /// Pictures held back before the first output, like a hardware
    /// reorder queue.  Draining flushes them.
    pub output_delay: usize,
    /// Polls that report still-executing before a token completes.
    pub completion_latency: u32,
    /// Row pitch alignment of engine surfaces, in bytes.
    pub alignment: usize,
    /// Surfaces in the engine pool.
    pub max_surfaces: usize,
}

impl Default for SwEngineConfig {
    fn default() -> Self {
        Self {
            output_delay: 2,
            completion_latency: 1,
            alignment: 32,
            max_surfaces: 8,
        }
    }
}

impl SwEngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(EngineError::Config(format!(
                "alignment {} must be a power of two",
                self.alignment
            )));
        }
        // The decoder holds output_delay + 1 surfaces before it emits one and
        // the caller holds one more while transferring it out.
        if self.max_surfaces < self.output_delay + 2 {
            return Err(EngineError::Config(format!(
                "max_surfaces {} must exceed output_delay {} + 1",
                self.max_surfaces, self.output_delay
            )));
        }
        Ok(())
    }
}
