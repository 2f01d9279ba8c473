pub mod component_state;
pub mod global_config;
pub mod job;
pub mod snapshot;

// Re-export core models for easy access
pub use component_state::ComponentState;
pub use global_config::{ConfigUpdate, GlobalConfig, MaskedConfig};
pub use job::Job;
pub use snapshot::{PersistedComponent, PersistedConfig, Snapshot};
