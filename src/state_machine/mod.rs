// State definitions for components and jobs.
//
// Transitions are driven by the pipeline executor, the cleanup path and the
// cluster status refresh; these types only describe which moves are legal.

pub mod states;

pub use states::{ComponentStatus, JobStatus};
