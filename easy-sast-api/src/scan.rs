//! Artifact upload and prescan operations of the Upload API.
//!
//! Files are sent to `uploadlargefile.do` as a raw request body, one request
//! per artifact, and the prescan is started with `beginprescan.do` once every
//! artifact has been accepted.

use log::{debug, info};

use crate::ApiError;
use crate::build::BuildInfo;
use crate::client::XmlTransport;
use crate::session::{ApiSession, UploadSession, guard};
use crate::xml::XmlElement;

/// Content type Veracode expects for `uploadlargefile.do` bodies.
pub const LARGE_FILE_CONTENT_TYPE: &str = "binary/octet-stream";

/// File upload status as defined in the Veracode filelist.xsd schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    PendingUpload,
    Uploading,
    Purged,
    Uploaded,
    Missing,
    Partial,
    InvalidChecksum,
    InvalidArchive,
    ArchiveWithinArchive,
    UnsupportedCompression,
    PasswordProtected,
    /// Any status string this client does not know about.
    Other(String),
}

impl FileStatus {
    #[must_use]
    pub fn is_uploaded(&self) -> bool {
        matches!(self, FileStatus::Uploaded)
    }

    /// Check if this status indicates the platform rejected the file
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            FileStatus::InvalidChecksum
                | FileStatus::InvalidArchive
                | FileStatus::ArchiveWithinArchive
                | FileStatus::UnsupportedCompression
                | FileStatus::PasswordProtected
                | FileStatus::Missing
                | FileStatus::Purged
        )
    }
}

impl From<&str> for FileStatus {
    fn from(status: &str) -> Self {
        match status {
            "Pending Upload" => FileStatus::PendingUpload,
            "Uploading" => FileStatus::Uploading,
            "Purged" => FileStatus::Purged,
            "Uploaded" => FileStatus::Uploaded,
            "Missing" => FileStatus::Missing,
            "Partial" => FileStatus::Partial,
            "Invalid Checksum" => FileStatus::InvalidChecksum,
            "Invalid Archive" => FileStatus::InvalidArchive,
            "Archive File Within Another Archive" => FileStatus::ArchiveWithinArchive,
            "Archive File with Unsupported Compression" => FileStatus::UnsupportedCompression,
            "Archive File is Password Protected" => FileStatus::PasswordProtected,
            other => FileStatus::Other(other.to_string()),
        }
    }
}

/// A file entry from a `<filelist>` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_id: String,
    pub file_name: String,
    pub file_status: FileStatus,
}

impl UploadedFile {
    fn from_xml(file: &XmlElement) -> Self {
        Self {
            file_id: file.attribute("file_id").unwrap_or_default().to_string(),
            file_name: file.attribute("file_name").unwrap_or_default().to_string(),
            file_status: FileStatus::from(file.attribute("file_status").unwrap_or_default()),
        }
    }
}

fn flag(value: bool) -> String {
    value.to_string()
}

/// Scan API operations for the Veracode XML Upload API
pub struct ScanApi<'a, T: XmlTransport> {
    transport: &'a T,
}

impl<'a, T: XmlTransport> ScanApi<'a, T> {
    #[must_use]
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Upload one artifact into the current build of the application, or of
    /// the session's sandbox when one is set.
    ///
    /// # Arguments
    ///
    /// * `upload` - The upload session
    /// * `filename` - Name the artifact is stored under on the platform
    /// * `data` - The artifact content
    ///
    /// # Returns
    ///
    /// Every file the build now holds, as reported by Veracode.
    ///
    /// # Errors
    ///
    /// Returns an error if Veracode rejects the upload or if the request
    /// fails.
    pub async fn upload_large_file(
        &self,
        upload: &UploadSession,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<Vec<UploadedFile>, ApiError> {
        guard(upload, &[])?;

        let mut params = vec![
            ("app_id".to_string(), upload.app_id().to_string()),
            ("filename".to_string(), filename.to_string()),
        ];
        if let Some(sandbox_id) = upload.sandbox_id() {
            params.push(("sandbox_id".to_string(), sandbox_id.to_string()));
        }

        debug!("Uploading {filename} ({} bytes)", data.len());
        let response = upload
            .http_post(
                self.transport,
                "uploadlargefile.do",
                params,
                Some((data, LARGE_FILE_CONTENT_TYPE)),
            )
            .await?;

        let files: Vec<UploadedFile> = response
            .find_all("file")
            .into_iter()
            .map(UploadedFile::from_xml)
            .collect();

        match files.iter().find(|file| file.file_name == filename) {
            Some(file) if file.file_status.is_error() => Err(ApiError::UnexpectedResponse {
                endpoint: "uploadlargefile.do".to_string(),
                message: format!("{filename} was rejected with status {:?}", file.file_status),
            }),
            _ => {
                info!("Uploaded {filename} to app_id {}", upload.app_id());
                Ok(files)
            }
        }
    }

    /// Start the prescan of the current build.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Application` if Veracode refuses to start the
    /// prescan and a transport error if the call could not be made.
    pub async fn begin_prescan(&self, upload: &UploadSession) -> Result<BuildInfo, ApiError> {
        guard(upload, &[])?;

        let mut params = vec![
            ("app_id".to_string(), upload.app_id().to_string()),
            (
                "scan_all_nonfatal_top_level_modules".to_string(),
                flag(upload.scan_all_nonfatal_top_level_modules()),
            ),
            ("auto_scan".to_string(), flag(upload.auto_scan())),
        ];
        if let Some(sandbox_id) = upload.sandbox_id() {
            params.push(("sandbox_id".to_string(), sandbox_id.to_string()));
        }

        let response = upload
            .http_post(self.transport, "beginprescan.do", params, None)
            .await?;
        info!("Started the prescan for app_id {}", upload.app_id());
        Ok(BuildInfo::from_xml(&response))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::client::Verb;
    use crate::test_utils::ScriptedTransport;

    const FILE_LIST: &str = r#"<filelist xmlns="https://analysiscenter.veracode.com/schema/2.0/filelist" filelist_version="1.1" account_id="1" app_id="1337" build_id="7654321"><file file_id="1" file_name="app.jar" file_status="Uploaded"/><file file_id="2" file_name="old.zip" file_status="Uploaded"/></filelist>"#;

    #[test]
    fn test_file_status_from_str() {
        assert_eq!(FileStatus::from("Uploaded"), FileStatus::Uploaded);
        assert!(FileStatus::from("Invalid Archive").is_error());
        assert_eq!(
            FileStatus::from("Something New"),
            FileStatus::Other("Something New".to_string())
        );
    }

    #[tokio::test]
    async fn test_upload_large_file_request() {
        let transport = ScriptedTransport::new().respond(200, FILE_LIST);
        let upload = UploadSession::new("1337")
            .expect("valid session")
            .with_sandbox_id(Some("42"))
            .expect("valid sandbox id");

        let files = ScanApi::new(&transport)
            .upload_large_file(&upload, "app.jar", b"PK\x03\x04".to_vec())
            .await
            .expect("upload should succeed");
        assert_eq!(files.len(), 2);
        assert!(files[0].file_status.is_uploaded());

        let request = &transport.requests()[0];
        assert_eq!(request.verb, Verb::Post);
        assert_eq!(request.endpoint(), "uploadlargefile.do");
        assert_eq!(request.param("filename"), Some("app.jar"));
        assert_eq!(request.param("sandbox_id"), Some("42"));
        assert_eq!(request.body.as_deref(), Some(&b"PK\x03\x04"[..]));
        assert!(
            request
                .headers
                .iter()
                .any(|(name, value)| name == "Content-Type" && value == LARGE_FILE_CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn test_upload_rejected_file() {
        let transport = ScriptedTransport::new().respond(
            200,
            r#"<filelist><file file_id="1" file_name="app.zip" file_status="Invalid Archive"/></filelist>"#,
        );
        let upload = UploadSession::new("1337").expect("valid session");

        let result = ScanApi::new(&transport)
            .upload_large_file(&upload, "app.zip", Vec::new())
            .await;
        assert!(matches!(result, Err(ApiError::UnexpectedResponse { .. })));
    }

    #[tokio::test]
    async fn test_upload_with_space_in_filename() {
        let transport = ScriptedTransport::new().respond(200, "<filelist/>");
        let upload = UploadSession::new("1337").expect("valid session");

        ScanApi::new(&transport)
            .upload_large_file(&upload, "my app.war", Vec::new())
            .await
            .expect("filenames are passed through as query parameters");
        assert_eq!(
            transport.requests()[0].url_with_params(),
            "https://analysiscenter.veracode.com/api/5.0/uploadlargefile.do?app_id=1337&filename=my%20app.war"
        );
    }

    #[tokio::test]
    async fn test_begin_prescan_flags() {
        let transport = ScriptedTransport::new()
            .respond(200, r#"<buildinfo app_id="1337" build_id="1"><build version="v1"/></buildinfo>"#);
        let upload = UploadSession::new("1337")
            .expect("valid session")
            .with_auto_scan(false)
            .expect("valid flag");

        let info = ScanApi::new(&transport)
            .begin_prescan(&upload)
            .await
            .expect("prescan should start");
        assert_eq!(info.version.as_deref(), Some("v1"));

        let request = &transport.requests()[0];
        assert_eq!(request.endpoint(), "beginprescan.do");
        assert_eq!(request.param("auto_scan"), Some("false"));
        assert_eq!(request.param("scan_all_nonfatal_top_level_modules"), Some("true"));
        assert_eq!(request.param("sandbox_id"), None);
    }
}
