pub mod clock;
pub mod cloud_config;
pub mod config;
pub mod expander;
pub mod lifecycle;
pub mod logger;
pub mod machine;
pub mod provider_manager;
pub mod services;
pub mod settings;
pub mod state_machine;

pub use clock::{Clock, TokioClock};
pub use config::{resolve, ConfigError};
pub use expander::expand;
pub use lifecycle::{InstanceLifecycle, WaitOptions};
pub use logger::{LifecycleEvent, LifecycleObserver, TracingObserver};
pub use services::{ErrorPolicy, FleetReport, NodeReport, Orchestrator};
pub use state_machine::LifecyclePhase;
