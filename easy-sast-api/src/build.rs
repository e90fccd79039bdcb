//! Build lifecycle operations of the Upload API.

use crate::client::XmlTransport;
use crate::session::{ApiSession, UploadSession, guard};
use crate::xml::XmlElement;
use crate::ApiError;
use log::{debug, info};

/// Build details returned by `createbuild.do` and `beginprescan.do`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInfo {
    pub app_id: Option<String>,
    pub build_id: Option<String>,
    pub sandbox_id: Option<String>,
    pub version: Option<String>,
}

impl BuildInfo {
    /// Read a `<buildinfo>` document. Missing attributes are left empty.
    #[must_use]
    pub fn from_xml(root: &XmlElement) -> Self {
        let mut info = Self {
            app_id: root.attribute("app_id").map(str::to_string),
            build_id: root.attribute("build_id").map(str::to_string),
            sandbox_id: root.attribute("sandbox_id").map(str::to_string),
            version: None,
        };

        if let Some(build) = root.find_all("build").first() {
            info.version = build.attribute("version").map(str::to_string);
            if info.build_id.is_none() {
                info.build_id = build.attribute("build_id").map(str::to_string);
            }
        }

        info
    }
}

/// Build API operations for the Veracode XML Upload API
pub struct BuildApi<'a, T: XmlTransport> {
    transport: &'a T,
}

impl<'a, T: XmlTransport> BuildApi<'a, T> {
    #[must_use]
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Create a build named after the session's build id, inside the
    /// session's sandbox if one is set.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Application` if Veracode refuses to create the
    /// build (for example because another build is still in progress) and a
    /// transport error if the call could not be made.
    pub async fn create_build(&self, upload: &UploadSession) -> Result<BuildInfo, ApiError> {
        guard(upload, &[])?;
        let endpoint = "createbuild.do";

        let mut params = vec![
            ("app_id".to_string(), upload.app_id().to_string()),
            ("version".to_string(), upload.build_id().to_string()),
        ];
        if let Some(sandbox_id) = upload.sandbox_id() {
            params.push(("sandbox_id".to_string(), sandbox_id.to_string()));
        }

        let response = upload.http_post(self.transport, endpoint, params, None).await?;
        let info = BuildInfo::from_xml(&response);
        info!(
            "Created build {} for app_id {}",
            info.build_id.as_deref().unwrap_or("(unknown)"),
            upload.app_id()
        );
        Ok(info)
    }

    /// Delete the most recent build of the application (or of the
    /// session's sandbox), which cancels a build that is still in progress.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::UnexpectedResponse` if Veracode does not report
    /// success, or any error from the call itself.
    pub async fn delete_build(&self, upload: &UploadSession) -> Result<(), ApiError> {
        guard(upload, &[])?;
        let endpoint = "deletebuild.do";

        let mut params = vec![("app_id".to_string(), upload.app_id().to_string())];
        if let Some(sandbox_id) = upload.sandbox_id() {
            params.push(("sandbox_id".to_string(), sandbox_id.to_string()));
        }

        let response = upload.http_post(self.transport, endpoint, params, None).await?;
        match response.find_all("result").first().map(|result| result.text()) {
            Some("success") | None => {
                debug!("Veracode accepted the build deletion for app_id {}", upload.app_id());
                Ok(())
            }
            Some(other) => Err(ApiError::UnexpectedResponse {
                endpoint: endpoint.to_string(),
                message: format!("build deletion result was {other}"),
            }),
        }
    }
}
