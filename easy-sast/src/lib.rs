//! Submit build artifacts to Veracode static analysis and gate a pipeline on
//! the application's policy compliance.
//!
//! The binary assembles its configuration from defaults, a YAML file, the
//! environment and the command line ([`config`]), builds one validated
//! session per API the workflow needs, and runs the workflow steps in order
//! ([`workflow`]).

pub mod cli;
pub mod compliance;
pub mod config;
pub mod credentials;
pub mod logging;
pub mod submit;
pub mod workflow;

pub use cli::Args;
pub use compliance::{ComplianceError, check_compliance, get_policy_compliance_status, in_compliance};
pub use config::{ConfigError, Sessions, apply_config, get_config, workflow_steps};
pub use credentials::{CredentialError, configure_credentials};
pub use submit::{SubmitError, filter_file, submit_artifacts};
pub use workflow::{WorkflowError, WorkflowStep, run_workflow};
