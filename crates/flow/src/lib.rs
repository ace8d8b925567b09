//! # Anyi Flow
//!
//! The engine that runs flows: ordered steps, each with an executor, an
//! optional validator and a retry budget, threading a [`FlowContext`]
//! from one step to the next.
//!
//! ```no_run
//! use anyi_flow::Registry;
//!
//! # async fn demo(config: anyi_config::AnyiConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::with_builtins();
//! registry.load_config(&config)?;
//! let flow = registry.get_flow("summarize")?;
//! let result = flow.run_with_input("A long article...").await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```
//!
//! [`FlowContext`]: anyi_core::FlowContext

pub mod executors;
pub mod flow;
pub mod registry;
pub mod step;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod validators;

pub use flow::{Flow, FlowFailure, ValidationPolicy};
pub use registry::{ExecutorFactory, Registry, ValidatorFactory};
pub use step::{Step, StepError};
