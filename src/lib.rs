pub mod cadence;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod grads;
pub mod image;
pub mod monitor;
pub mod params;
pub mod reporting;
pub mod sample;

pub use checkpoint::{Checkpointer, SafetensorsCheckpointer};
pub use config::{RunConfig, SampleSpec, WandbConfig};
pub use error::{ConfigErr, MonitorErr, Result};
pub use grads::GradientSummary;
pub use image::{Image, ImageIo, PpmImageIo};
pub use monitor::{StepMonitor, StepMonitorBuilder, StepOutputs, StepReport};
pub use params::{NamedParams, Param, ParamStore};
pub use reporting::{JsonlBackend, MetricsBackend, StepRecord};
pub use sample::{Condition, GenerationRequest, SampleGenerator, SampleRequest};
