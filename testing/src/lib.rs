//! # authflow-test
//!
//! In-memory collaborators and a [`Harness`] that runs the declarative login and signup
//! flows through a real [`FlowService`](authflow_runtime::FlowService).
//!
//! ```ignore
//! let harness = Harness::new(fixtures::app_config()?)?;
//! fixtures::seed_alice(&harness.directory);
//! let output = harness.start(FlowType::Login, "default").await?;
//! ```

pub mod fakes;
pub mod fixtures;
pub mod harness;

pub use harness::Harness;

#[cfg(test)]
mod scenarios;
