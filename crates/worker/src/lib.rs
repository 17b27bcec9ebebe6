pub mod config;
pub mod error;
pub mod ffprobe;
pub mod classifier;
pub mod projector;
pub mod cache;
pub mod store;
pub mod notify;
pub mod pipeline;
pub mod server;

pub use config::{ConfigurePatch, WorkerConfig};
pub use error::{CacheCorruptError, CacheStoreError, ProbeError, PublishError};
pub use ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream, FfprobeCommand, Prober};
pub use classifier::{classify, ClassifiedStream, FieldValue, NormalizedResult, StreamCategory, StreamField};
pub use projector::{project, FlatMetadataMap};
pub use pipeline::{OutcomeStatus, Pipeline, ProcessOutcome, ProcessRequest};
