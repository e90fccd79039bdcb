//! Artifact submission workflow.
//!
//! One pass through: resolve the sandbox (if one was requested), create a
//! build, pick the uploadable artifacts out of the build directory, upload
//! each one and start the prescan. The only retry is cancelling a build that
//! is still in progress and creating the new build again, once.

use easy_sast_api::{
    ApiError, ApiSession, BuildApi, BuildInfo, SandboxApi, SandboxSession, ScanApi,
    UploadSession, ValidationError, XmlTransport,
};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};

/// Artifact suffixes Veracode accepts for static analysis.
pub const WHITELIST_FILE_SUFFIXES: [&str; 11] = [
    ".exe", ".pdb", ".dll", ".jar", ".zip", ".tar", ".tgz", ".war", ".ear", ".apk", ".ipa",
];

/// Accepted multi-part suffix.
pub const WHITELIST_FILE_SUFFIX_PAIR: [&str; 2] = [".tar", ".gz"];

/// Custom error types for artifact submission
#[derive(Debug, thiserror::Error)]
#[must_use = "Need to handle all error enum types."]
pub enum SubmitError {
    #[error("Unable to resolve the sandbox: {0}")]
    Sandbox(#[source] ApiError),

    #[error("Failed to create a build: {0}")]
    CreateBuild(#[source] ApiError),

    #[error("Failed to cancel the build in progress: {0}")]
    CancelBuild(#[source] ApiError),

    #[error("Unable to read the build directory {path}: {source}")]
    BuildDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Nothing to upload from {0}")]
    NoArtifacts(PathBuf),

    #[error("Unable to read the artifact {path}: {source}")]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to upload {path}: {source}")]
    Upload {
        path: PathBuf,
        #[source]
        source: ApiError,
    },

    #[error("Failed to start the prescan: {0}")]
    Prescan(#[source] ApiError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Suffixes of a file name the way they are usually understood: everything
/// after each `.` past the first character, so `.bashrc` has none.
fn suffixes(name: &str) -> Vec<String> {
    let stem = name.trim_start_matches('.');
    stem.split('.')
        .skip(1)
        .map(|suffix| format!(".{suffix}"))
        .collect()
}

/// Whether `artifact` has an uploadable suffix.
///
/// The last suffix must be whitelisted, or the last two must be `.tar.gz`.
#[must_use]
pub fn filter_file(artifact: &Path) -> bool {
    let name = artifact
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    let suffixes = suffixes(&name);

    let mut allowed = false;
    if let Some(last) = suffixes.last()
        && WHITELIST_FILE_SUFFIXES.contains(&last.as_str())
    {
        debug!("Suffix for {} is in the whitelist", artifact.display());
        allowed = true;
    }

    if suffixes.len() >= 2 && suffixes[suffixes.len() - 2..] == WHITELIST_FILE_SUFFIX_PAIR {
        debug!("Suffixes for {} are in the whitelist", artifact.display());
        allowed = true;
    }

    if !allowed {
        warn!(
            "{} was filtered out from being uploaded based on its file extension",
            artifact.display()
        );
    }
    allowed
}

/// The immediate entries of `build_dir` that pass [`filter_file`], sorted.
///
/// # Errors
///
/// Returns `SubmitError::BuildDir` if the directory cannot be listed.
pub fn collect_artifacts(build_dir: &Path) -> Result<Vec<PathBuf>, SubmitError> {
    let build_dir_error = |source| SubmitError::BuildDir {
        path: build_dir.to_path_buf(),
        source,
    };

    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(build_dir).map_err(build_dir_error)? {
        let path = entry.map_err(build_dir_error)?.path();
        debug!("Calling filter_file on {}", path.display());
        if filter_file(&path) {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    Ok(artifacts)
}

/// Look the sandbox up by name and create it if it does not exist.
///
/// # Errors
///
/// Returns `SubmitError::Sandbox` if the listing or the creation fails.
pub async fn resolve_sandbox<T: XmlTransport>(
    transport: &T,
    sandbox: &SandboxSession,
) -> Result<String, SubmitError> {
    let api = SandboxApi::new(transport);

    let sandbox_id = match api.get_sandbox_id(sandbox).await.map_err(SubmitError::Sandbox)? {
        Some(sandbox_id) => sandbox_id,
        None => {
            info!("Sandbox does not exist yet, creating it");
            api.create_sandbox(sandbox)
                .await
                .map_err(SubmitError::Sandbox)?
        }
    };
    Ok(sandbox_id.to_string())
}

/// Create the build, cancelling a build that is still in progress and
/// trying again once if Veracode refuses.
///
/// # Errors
///
/// Returns `SubmitError::CancelBuild` if the cancellation fails and
/// `SubmitError::CreateBuild` if the build still cannot be created.
pub async fn create_build<T: XmlTransport>(
    transport: &T,
    upload: &UploadSession,
) -> Result<BuildInfo, SubmitError> {
    let api = BuildApi::new(transport);

    match api.create_build(upload).await {
        Ok(info) => Ok(info),
        Err(ApiError::Application(message)) => {
            warn!("Veracode refused to create the build ({message}), cancelling the build in progress");
            api.delete_build(upload)
                .await
                .map_err(SubmitError::CancelBuild)?;
            info!("Cancelled the build in progress, retrying the build creation");
            api.create_build(upload)
                .await
                .map_err(SubmitError::CreateBuild)
        }
        Err(e) => Err(SubmitError::CreateBuild(e)),
    }
}

/// Submit build artifacts to Veracode for static analysis.
///
/// # Arguments
///
/// * `transport` - The signed XML transport
/// * `upload` - The upload session
/// * `sandbox` - The sandbox session, if a sandbox was requested
///
/// # Returns
///
/// The upload session that was used, including any resolved sandbox id.
///
/// # Errors
///
/// Returns the error of the first step that failed. Later steps are not
/// attempted.
pub async fn submit_artifacts<T: XmlTransport>(
    transport: &T,
    upload: &UploadSession,
    sandbox: Option<&SandboxSession>,
) -> Result<UploadSession, SubmitError> {
    let mut upload = upload.clone();

    if let Some(sandbox) = sandbox {
        info!("Resolving the sandbox for app_id {}", sandbox.app_id());
        let sandbox_id = resolve_sandbox(transport, sandbox).await?;
        upload = upload.with_sandbox_id(Some(&sandbox_id))?;
    }

    info!("Attempting to create a build");
    create_build(transport, &upload).await.inspect_err(|e| {
        error!("Failed to call create_build: {e}");
    })?;
    info!("Successfully called create_build");

    info!("Beginning pre-upload file filtering");
    let artifacts = collect_artifacts(upload.build_dir())?;
    if artifacts.is_empty() {
        error!("Nothing to upload");
        return Err(SubmitError::NoArtifacts(upload.build_dir().to_path_buf()));
    }

    info!("Beginning file uploads");
    let scan = ScanApi::new(transport);
    for artifact in &artifacts {
        let filename = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = std::fs::read(artifact).map_err(|source| {
            error!("Unable to read {}", artifact.display());
            SubmitError::ReadArtifact {
                path: artifact.clone(),
                source,
            }
        })?;

        scan.upload_large_file(&upload, &filename, data)
            .await
            .map_err(|source| {
                error!(
                    "Error encountered when attempting to upload {filename} to the Veracode Upload API"
                );
                SubmitError::Upload {
                    path: artifact.clone(),
                    source,
                }
            })?;
        info!("Successfully uploaded {}", artifact.display());
    }
    info!("File uploads complete");

    scan.begin_prescan(&upload)
        .await
        .map_err(SubmitError::Prescan)?;
    info!("Successfully began the prescan");

    Ok(upload)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use easy_sast_api::test_utils::ScriptedTransport;
    use tempfile::TempDir;

    const BUILD_INFO: &str = r#"<buildinfo app_id="1337" build_id="1"><build version="v1" build_id="1"/></buildinfo>"#;
    const IN_PROGRESS: &str =
        "<error>Cannot create a new build while an existing build is in progress.</error>";

    fn upload_session(dir: &TempDir) -> UploadSession {
        UploadSession::new("1337")
            .expect("valid session")
            .with_build_dir(dir.path().to_path_buf())
            .expect("valid build dir")
            .with_build_id("v1")
            .expect("valid build id")
    }

    #[test]
    fn test_filter_file() {
        for allowed in ["app.jar", "/build/app.war", "bundle.tar.gz", "lib.tar", "a.b.zip"] {
            assert!(filter_file(Path::new(allowed)), "{allowed} should be allowed");
        }
        for rejected in ["file.thingy", "file", "file.tar.gz.bar", ".jar", "app.JAR", "app.gz"] {
            assert!(!filter_file(Path::new(rejected)), "{rejected} should be rejected");
        }
    }

    #[test]
    fn test_collect_artifacts() {
        let dir = TempDir::new().expect("temp dir");
        for name in ["b.jar", "a.zip", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"data").expect("write artifact");
        }

        let artifacts = collect_artifacts(dir.path()).expect("directory lists");
        let names: Vec<_> = artifacts
            .iter()
            .filter_map(|path| path.file_name())
            .collect();
        assert_eq!(names, ["a.zip", "b.jar"]);

        assert!(matches!(
            collect_artifacts(&dir.path().join("missing")),
            Err(SubmitError::BuildDir { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_build_cancels_and_retries_once() {
        let dir = TempDir::new().expect("temp dir");
        let transport = ScriptedTransport::new()
            .respond(200, IN_PROGRESS)
            .respond(200, "<deletebuildresult><result>success</result></deletebuildresult>")
            .respond(200, BUILD_INFO);

        create_build(&transport, &upload_session(&dir))
            .await
            .expect("retry succeeds");
        assert_eq!(
            transport.endpoints(),
            ["createbuild.do", "deletebuild.do", "createbuild.do"]
        );
    }

    #[tokio::test]
    async fn test_create_build_retry_fails() {
        let dir = TempDir::new().expect("temp dir");
        let transport = ScriptedTransport::new()
            .respond(200, IN_PROGRESS)
            .respond(200, "<deletebuildresult><result>success</result></deletebuildresult>")
            .respond(200, IN_PROGRESS);

        let result = create_build(&transport, &upload_session(&dir)).await;
        assert!(matches!(result, Err(SubmitError::CreateBuild(_))));
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn test_create_build_cancel_fails() {
        let dir = TempDir::new().expect("temp dir");
        let transport = ScriptedTransport::new()
            .respond(200, IN_PROGRESS)
            .respond(500, "");

        let result = create_build(&transport, &upload_session(&dir)).await;
        assert!(matches!(result, Err(SubmitError::CancelBuild(_))));
        assert_eq!(transport.endpoints(), ["createbuild.do", "deletebuild.do"]);
    }

    #[tokio::test]
    async fn test_create_build_transport_error_is_not_retried() {
        let dir = TempDir::new().expect("temp dir");
        let transport =
            ScriptedTransport::new().fail(ApiError::Timeout("createbuild.do".to_string()));

        let result = create_build(&transport, &upload_session(&dir)).await;
        assert!(matches!(result, Err(SubmitError::CreateBuild(ApiError::Timeout(_)))));
        assert_eq!(transport.endpoints(), ["createbuild.do"]);
    }

    #[tokio::test]
    async fn test_submit_artifacts_happy_path() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("app.jar"), b"PK").expect("write artifact");
        std::fs::write(dir.path().join("README.md"), b"docs").expect("write readme");
        let transport = ScriptedTransport::new()
            .respond(200, BUILD_INFO)
            .respond(200, r#"<filelist><file file_id="1" file_name="app.jar" file_status="Uploaded"/></filelist>"#)
            .respond(200, BUILD_INFO);

        submit_artifacts(&transport, &upload_session(&dir), None)
            .await
            .expect("submission succeeds");

        assert_eq!(
            transport.endpoints(),
            ["createbuild.do", "uploadlargefile.do", "beginprescan.do"]
        );
        let upload_request = &transport.requests()[1];
        assert_eq!(upload_request.param("filename"), Some("app.jar"));
        assert_eq!(upload_request.body.as_deref(), Some(&b"PK"[..]));
    }

    #[tokio::test]
    async fn test_submit_artifacts_nothing_to_upload() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("notes.txt"), b"text").expect("write file");
        let transport = ScriptedTransport::new().respond(200, BUILD_INFO);

        let result = submit_artifacts(&transport, &upload_session(&dir), None).await;
        assert!(matches!(result, Err(SubmitError::NoArtifacts(_))));
        assert_eq!(transport.endpoints(), ["createbuild.do"]);
    }

    #[tokio::test]
    async fn test_submit_artifacts_upload_failure_aborts() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("a.jar"), b"a").expect("write artifact");
        std::fs::write(dir.path().join("b.jar"), b"b").expect("write artifact");
        let transport = ScriptedTransport::new()
            .respond(200, BUILD_INFO)
            .fail(ApiError::Connection("reset".to_string()));

        let result = submit_artifacts(&transport, &upload_session(&dir), None).await;
        assert!(matches!(result, Err(SubmitError::Upload { .. })));
        assert_eq!(transport.endpoints(), ["createbuild.do", "uploadlargefile.do"]);
    }

    #[tokio::test]
    async fn test_submit_artifacts_creates_missing_sandbox() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("app.war"), b"war").expect("write artifact");
        let sandbox = SandboxSession::new("1337")
            .expect("valid session")
            .with_sandbox_name("feature-x")
            .expect("valid name");
        let transport = ScriptedTransport::new()
            .respond(200, r#"<sandboxlist app_id="1337"/>"#)
            .respond(200, r#"<sandboxinfo><sandbox sandbox_id="555" sandbox_name="feature-x"/></sandboxinfo>"#)
            .respond(200, BUILD_INFO)
            .respond(200, "<filelist/>")
            .respond(200, BUILD_INFO);

        let upload = submit_artifacts(&transport, &upload_session(&dir), Some(&sandbox))
            .await
            .expect("submission succeeds");
        assert_eq!(upload.sandbox_id().map(|id| id.as_str()), Some("555"));

        let requests = transport.requests();
        assert_eq!(requests[1].endpoint(), "createsandbox.do");
        for request in &requests[2..] {
            assert_eq!(request.param("sandbox_id"), Some("555"));
        }
    }

    #[tokio::test]
    async fn test_submit_artifacts_sandbox_lookup_failure_is_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let sandbox = SandboxSession::new("1337")
            .expect("valid session")
            .with_sandbox_name("feature-x")
            .expect("valid name");
        let transport = ScriptedTransport::new().respond(503, "");

        let result = submit_artifacts(&transport, &upload_session(&dir), Some(&sandbox)).await;
        assert!(matches!(result, Err(SubmitError::Sandbox(_))));
        assert_eq!(transport.endpoints(), ["getsandboxlist.do"]);
    }
}
