pub mod config;
pub mod errors;
pub mod event_bus;
pub mod events;
pub mod scheduler;
pub mod structured_logging;
pub mod topics;

pub use config::{AppConfig, AuthConfig, ConfigLoader, HostConfig, LogConfig};
pub use errors::{HostError, HostResult};
pub use event_bus::{EventBus, EventEnvelope, Topic};
pub use scheduler::{Schedule, ScheduledTask, TaskFn};
pub use structured_logging::{init_structured_logging, LoggingConfig, StructuredLogEntry};
