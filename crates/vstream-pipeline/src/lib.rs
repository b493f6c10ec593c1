#![doc = include_str!("../README.md")]

pub mod config;
pub mod decode;
pub mod encode;
pub mod machine;
pub mod report;
pub mod session;

pub use config::PipelineConfig;
pub use decode::DecodePipeline;
pub use encode::EncodePipeline;
pub use machine::{Phase, PipelineKind, PipelineState};
pub use report::PipelineReport;

#[cfg(test)]
mod tests {
    use super::PipelineConfig;

    #[test]
    fn default_config_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }
}
