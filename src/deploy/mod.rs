//! Deployment input negotiation: runtime probing, conflict reconciliation,
//! state detection and config diffing.

pub mod config_diff;
pub mod error;
pub mod field;
pub mod inputs;
pub mod probe;
pub mod reconcile;
pub mod resolver;
pub mod state;
pub mod template;
pub mod value;

pub use error::DeployInputError;
pub use inputs::{CarriedInputs, DeploymentInputSet, EnvOverrides, InitialFlags, RuntimeMode};
pub use resolver::{InputResolver, ResolveRequest};
pub use state::{ContainerState, EnvironmentState, detect};
pub use value::{ValueChoice, ValueSource};
