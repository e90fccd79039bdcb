//! Ordered execution of the configured workflow steps.

use crate::compliance::check_compliance;
use crate::config::Sessions;
use crate::submit::{SubmitError, submit_artifacts};
use easy_sast_api::{ApiKind, ApiSession, XmlTransport};
use log::{error, info};
use std::fmt;

/// A step of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    SubmitArtifacts,
    CheckCompliance,
}

impl WorkflowStep {
    /// Steps run when no workflow is configured, in order.
    pub const DEFAULT: [WorkflowStep; 2] = [Self::SubmitArtifacts, Self::CheckCompliance];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubmitArtifacts => "submit_artifacts",
            Self::CheckCompliance => "check_compliance",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::DEFAULT.into_iter().find(|step| step.as_str() == name)
    }

    /// APIs the step talks to.
    #[must_use]
    pub fn required_apis(self) -> &'static [ApiKind] {
        match self {
            Self::SubmitArtifacts => &[ApiKind::Upload, ApiKind::Sandbox],
            Self::CheckCompliance => &[ApiKind::Results],
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[must_use = "Need to handle all error enum types."]
pub enum WorkflowError {
    #[error("No {0} session was configured")]
    MissingSession(ApiKind),

    #[error("Failed to submit build artifacts for scanning: {0}")]
    Submit(#[from] SubmitError),

    #[error("The compliance check failed for app_id {app_id}")]
    NotCompliant { app_id: String },
}

/// Run `steps` in order, stopping at the first one that fails.
///
/// # Errors
///
/// Returns the failure of the first step that did not succeed. No later
/// step is attempted.
pub async fn run_workflow<T: XmlTransport>(
    steps: &[WorkflowStep],
    sessions: &Sessions,
    transport: &T,
) -> Result<(), WorkflowError> {
    for step in steps {
        info!("Running the {step} workflow step");
        match step {
            WorkflowStep::SubmitArtifacts => {
                let upload = sessions
                    .upload
                    .as_ref()
                    .ok_or(WorkflowError::MissingSession(ApiKind::Upload))?;
                submit_artifacts(transport, upload, sessions.sandbox.as_ref())
                    .await
                    .inspect_err(|e| error!("Failed to submit build artifacts for scanning: {e}"))?;
                info!("Successfully submit build artifacts for scanning");
            }
            WorkflowStep::CheckCompliance => {
                let results = sessions
                    .results
                    .as_ref()
                    .ok_or(WorkflowError::MissingSession(ApiKind::Results))?;
                if !check_compliance(transport, results).await {
                    return Err(WorkflowError::NotCompliant {
                        app_id: results.app_id().to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use easy_sast_api::test_utils::ScriptedTransport;

    #[test]
    fn test_step_names() {
        for step in WorkflowStep::DEFAULT {
            assert_eq!(WorkflowStep::from_name(step.as_str()), Some(step));
        }
        assert_eq!(WorkflowStep::from_name("deploy"), None);
        assert_eq!(
            easy_sast_api::validation::SUPPORTED_WORKFLOWS,
            WorkflowStep::DEFAULT.map(WorkflowStep::as_str)
        );
    }

    #[tokio::test]
    async fn test_missing_session_fails_before_any_request() {
        let transport = ScriptedTransport::new();
        let result = run_workflow(
            &[WorkflowStep::CheckCompliance],
            &Sessions::default(),
            &transport,
        )
        .await;
        assert!(matches!(
            result,
            Err(WorkflowError::MissingSession(ApiKind::Results))
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_empty_workflow_succeeds() {
        let transport = ScriptedTransport::new();
        run_workflow(&[], &Sessions::default(), &transport)
            .await
            .expect("nothing to do");
    }
}
