//! # Step Runner Seam
//!
//! The external collaborator that executes one named provisioning action.
//! Implementations must stream output through the callback as it is
//! produced and must always resolve: transport or process errors become a
//! failed [`StepOutcome`], never an `Err` or a panic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value parameters handed to one action
pub type StepParameters = Map<String, Value>;

/// Callback receiving output chunks in production order
pub type OutputSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Final result of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    /// Every chunk that went through the sink, concatenated
    pub output: String,
    pub exit_status: i32,
}

impl StepOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_status: 0,
        }
    }

    pub fn failed(output: impl Into<String>, exit_status: i32) -> Self {
        Self {
            success: false,
            output: output.into(),
            exit_status,
        }
    }
}

#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(
        &self,
        action: &str,
        parameters: &StepParameters,
        on_output: OutputSink<'_>,
    ) -> StepOutcome;
}
