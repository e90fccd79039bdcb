//! Sandbox API operations: look up a sandbox by name and create it when absent.

use log::{debug, info, warn};

use crate::ApiError;
use crate::client::XmlTransport;
use crate::session::{ApiSession, SandboxSession, guard};
use crate::validation::{SandboxId, SandboxName, ValidationError};
use crate::xml::XmlElement;

/// A `<sandbox>` entry of a `getsandboxlist.do` or `createsandbox.do` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSummary {
    pub sandbox_id: String,
    pub sandbox_name: String,
}

impl SandboxSummary {
    fn from_xml(sandbox: &XmlElement) -> Option<Self> {
        Some(Self {
            sandbox_id: sandbox.attribute("sandbox_id")?.to_string(),
            sandbox_name: sandbox.attribute("sandbox_name")?.to_string(),
        })
    }
}

fn requested_name(sandbox: &SandboxSession) -> Result<&SandboxName, ApiError> {
    sandbox.sandbox_name().ok_or_else(|| {
        ApiError::Validation(ValidationError::InvalidAttribute {
            key: "sandbox_name".to_string(),
        })
    })
}

/// Sandbox API operations for the Veracode XML Sandbox API
pub struct SandboxApi<'a, T: XmlTransport> {
    transport: &'a T,
}

impl<'a, T: XmlTransport> SandboxApi<'a, T> {
    #[must_use]
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// List every sandbox of the session's application.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing could not be retrieved.
    pub async fn get_sandbox_list(
        &self,
        sandbox: &SandboxSession,
    ) -> Result<Vec<SandboxSummary>, ApiError> {
        guard(sandbox, &[])?;
        let params = vec![("app_id".to_string(), sandbox.app_id().to_string())];

        let response = sandbox
            .http_get(self.transport, "getsandboxlist.do", params)
            .await?;
        let sandboxes: Vec<SandboxSummary> = response
            .find_all("sandbox")
            .into_iter()
            .filter_map(SandboxSummary::from_xml)
            .collect();
        debug!(
            "Found {} sandboxes for app_id {}",
            sandboxes.len(),
            sandbox.app_id()
        );
        Ok(sandboxes)
    }

    /// Resolve the session's sandbox name to an id.
    ///
    /// Returns `Ok(None)` if the application has no sandbox with that name.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Validation` if the session has no sandbox name, or
    /// any error from the listing call.
    pub async fn get_sandbox_id(
        &self,
        sandbox: &SandboxSession,
    ) -> Result<Option<SandboxId>, ApiError> {
        let name = requested_name(sandbox)?;

        let found = self
            .get_sandbox_list(sandbox)
            .await?
            .into_iter()
            .find(|summary| summary.sandbox_name == name.as_str());

        match found {
            Some(summary) => {
                debug!("Sandbox {name} has id {}", summary.sandbox_id);
                Ok(Some(SandboxId::new(summary.sandbox_id)?))
            }
            None => {
                debug!("No sandbox named {name} exists for app_id {}", sandbox.app_id());
                Ok(None)
            }
        }
    }

    /// Create a sandbox named after the session's sandbox name.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::UnexpectedResponse` if the response does not carry
    /// a usable sandbox id, `ApiError::Validation` if the session has no
    /// sandbox name, or any error from the call itself.
    pub async fn create_sandbox(&self, sandbox: &SandboxSession) -> Result<SandboxId, ApiError> {
        let name = requested_name(sandbox)?;
        guard(sandbox, &[])?;
        let endpoint = "createsandbox.do";

        let params = vec![
            ("app_id".to_string(), sandbox.app_id().to_string()),
            ("sandbox_name".to_string(), name.to_string()),
        ];
        let response = sandbox.http_post(self.transport, endpoint, params, None).await?;

        let sandbox_id = response
            .find_all("sandbox")
            .into_iter()
            .find_map(|element| element.attribute("sandbox_id"))
            .ok_or_else(|| ApiError::UnexpectedResponse {
                endpoint: endpoint.to_string(),
                message: "no sandbox_id in the response".to_string(),
            })?;

        let sandbox_id = SandboxId::new(sandbox_id).map_err(|e| {
            warn!("Veracode returned an unusable sandbox id: {e}");
            ApiError::UnexpectedResponse {
                endpoint: endpoint.to_string(),
                message: format!("invalid sandbox_id {sandbox_id}"),
            }
        })?;
        info!("Created sandbox {name} with id {sandbox_id}");
        Ok(sandbox_id)
    }
}
