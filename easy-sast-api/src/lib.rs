//! # Veracode XML API Client Library
//!
//! Client for the parts of the Veracode XML APIs that `easy_sast` needs to
//! submit build artifacts for static analysis and read back the policy
//! compliance verdict.
//!
//! ## Features
//!
//! - 🔐 **HMAC Authentication** - Veracode request signing with explicit credentials
//! - ✅ **Validated Sessions** - Upload, Results and Sandbox sessions that can only
//!   hold values accepted by the attribute validator
//! - 📤 **Upload API** - build creation and cancellation, large file upload, prescan
//! - 🧪 **Sandbox API** - sandbox lookup by name and creation
//! - 📊 **Results API** - application build listing for compliance checks
//! - 🧩 **Transport seam** - every remote call goes through [`XmlTransport`], so
//!   workflows can be exercised without a network
//!
//! ## Quick Start
//!
//! ```no_run
//! use easy_sast_api::{ApiCredentials, ResultsApi, ResultsSession, SastClient};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = ApiCredentials::new(
//!         "0123456789abcdef0123456789abcdef".to_string(),
//!         "0123456789abcdef".repeat(8),
//!     )?;
//!     let client = SastClient::new(credentials)?;
//!     let session = ResultsSession::new("1337")?;
//!
//!     let builds = ResultsApi::new(&client).get_app_builds(&session, true).await?;
//!     println!("{} applications returned", builds.children().len());
//!     Ok(())
//! }
//! ```

pub mod build;
pub mod client;
pub mod credentials;
pub mod results;
pub mod sandbox;
pub mod scan;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod validation;
pub mod value;
pub mod xml;

use thiserror::Error;

pub use build::{BuildApi, BuildInfo};
pub use client::{SastClient, Verb, XmlRequest, XmlTransport, interpret_response};
pub use credentials::ApiCredentials;
pub use results::ResultsApi;
pub use sandbox::{SandboxApi, SandboxSummary};
pub use scan::{FileStatus, ScanApi, UploadedFile};
pub use session::{
    ApiKind, ApiSession, ResultsSession, SandboxSession, UploadSession, Validatable, guard,
};
pub use validation::{
    AppId, BaseUrl, BuildId, SandboxId, SandboxName, ValidationError, is_valid_attribute,
    validate_attribute,
};
pub use value::{ConfigMap, ConfigValue};
pub use xml::{XmlElement, parse_xml};

/// Errors raised while talking to the Veracode XML APIs.
///
/// Transport failures, API-declared `<error>` documents and unparsable
/// responses are kept apart so callers can tell "could not reach Veracode"
/// from "Veracode said no".
#[derive(Debug, Error)]
#[must_use = "Need to handle all error enum types."]
pub enum ApiError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Too many redirects: {0}")]
    TooManyRedirects(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP error: status {status}")]
    HttpStatus { status: u16 },

    #[error("The Veracode API responded with an error: {0}")]
    Application(String),

    #[error("Failed to parse the XML response: {0}")]
    MalformedXml(String),

    #[error("Unexpected response from {endpoint}: {message}")]
    UnexpectedResponse { endpoint: String, message: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("No version is configured for endpoint {0}")]
    UnknownEndpoint(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ApiError {
    /// Whether the request failed before a usable response was received.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Timeout(_)
                | Self::TooManyRedirects(_)
                | Self::Request(_)
                | Self::HttpStatus { .. }
        )
    }
}
