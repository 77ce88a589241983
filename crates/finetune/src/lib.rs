pub mod config;
pub mod data;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod module;
pub mod optim;
pub mod scheduler;

pub use config::FinetuneConfig;
pub use data::SummarizationDataset;
pub use distributed::{Collective, SingleProcess};
pub use engine::Engine;
pub use error::FinetuneError;
pub use logging::{ConsoleLogger, LogOptions, MemoryLogger, MetricLogger};
pub use metrics::{RougeAccumulator, RougeScores};
pub use module::{FinetuneModule, OptimizerSetup, StepOutput};
pub use optim::OptimizerStrategy;
pub use scheduler::{ScheduleDescriptor, SchedulePhase, SchedulerInterval, WarmupCosineSchedule};
