//! Validated session objects for the Upload, Results and Sandbox APIs.
//!
//! A session can only be obtained through its constructor, and every change
//! produces a new session that has passed the attribute validator, so a
//! session in hand is always valid. [`Validatable::validate`] re-checks every
//! field and is run by [`guard`] at the start of each remote operation.

use crate::client::{Verb, XmlRequest, XmlTransport};
use crate::validation::{
    AppId, BaseUrl, BuildId, SandboxId, SandboxName, ValidationError, is_valid_attribute,
    validate_attribute,
};
use crate::value::{ConfigMap, ConfigValue};
use crate::xml::XmlElement;
use crate::ApiError;
use log::{debug, error};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Base URL of the Veracode XML APIs.
pub const DEFAULT_BASE_URL: &str = "https://analysiscenter.veracode.com/api/";

/// Default build directory for artifact uploads.
pub const DEFAULT_BUILD_DIR: &str = "/build";

pub const UPLOAD_API_VERSIONS: [(&str, &str); 19] = [
    ("beginprescan.do", "5.0"),
    ("beginscan.do", "5.0"),
    ("createapp.do", "5.0"),
    ("createbuild.do", "5.0"),
    ("deleteapp.do", "5.0"),
    ("deletebuild.do", "5.0"),
    ("getappinfo.do", "5.0"),
    ("getapplist.do", "5.0"),
    ("getbuildinfo.do", "5.0"),
    ("getbuildlist.do", "5.0"),
    ("getfilelist.do", "5.0"),
    ("getpolicylist.do", "5.0"),
    ("getprescanresults.do", "5.0"),
    ("getvendorlist.do", "5.0"),
    ("removefile.do", "5.0"),
    ("updateapp.do", "5.0"),
    ("updatebuild.do", "5.0"),
    ("uploadfile.do", "5.0"),
    ("uploadlargefile.do", "5.0"),
];

pub const RESULTS_API_VERSIONS: [(&str, &str); 8] = [
    ("detailedreport.do", "5.0"),
    ("detailedreportpdf.do", "4.0"),
    ("getaccountcustomfieldlist.do", "5.0"),
    ("getappbuilds.do", "4.0"),
    ("getcallstacks.do", "5.0"),
    ("summaryreport.do", "4.0"),
    ("summaryreportpdf.do", "4.0"),
    ("thirdpartyreportpdf.do", "4.0"),
];

pub const SANDBOX_API_VERSIONS: [(&str, &str); 5] = [
    ("createsandbox.do", "5.0"),
    ("getsandboxlist.do", "5.0"),
    ("promotesandbox.do", "5.0"),
    ("updatesandbox.do", "5.0"),
    ("deletesandbox.do", "5.0"),
];

const UPLOAD_ATTRIBUTES: [&str; 8] = [
    "base_url",
    "version",
    "app_id",
    "build_dir",
    "build_id",
    "sandbox_id",
    "scan_all_nonfatal_top_level_modules",
    "auto_scan",
];

const RESULTS_ATTRIBUTES: [&str; 4] = ["base_url", "version", "app_id", "ignore_compliance_status"];

const SANDBOX_ATTRIBUTES: [&str; 6] = [
    "base_url",
    "version",
    "app_id",
    "build_id",
    "sandbox_id",
    "sandbox_name",
];

/// The three XML APIs a session can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiKind {
    Upload,
    Results,
    Sandbox,
}

impl ApiKind {
    pub const ALL: [ApiKind; 3] = [Self::Upload, Self::Results, Self::Sandbox];

    /// Name used as the key under `apis` in the configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Results => "results",
            Self::Sandbox => "sandbox",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Attributes a session of this kind declares.
    #[must_use]
    pub fn attributes(self) -> &'static [&'static str] {
        match self {
            Self::Upload => &UPLOAD_ATTRIBUTES,
            Self::Results => &RESULTS_ATTRIBUTES,
            Self::Sandbox => &SANDBOX_ATTRIBUTES,
        }
    }

    #[must_use]
    pub fn default_versions(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Upload => &UPLOAD_API_VERSIONS,
            Self::Results => &RESULTS_API_VERSIONS,
            Self::Sandbox => &SANDBOX_API_VERSIONS,
        }
    }

    #[must_use]
    pub fn declares(self, key: &str) -> bool {
        self.attributes().contains(&key)
    }
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes declared by every kind of session.
#[must_use]
pub fn common_attributes() -> Vec<&'static str> {
    UPLOAD_ATTRIBUTES
        .into_iter()
        .filter(|key| ApiKind::ALL.iter().all(|kind| kind.declares(key)))
        .collect()
}

/// Whole-object validation.
pub trait Validatable {
    fn kind(&self) -> ApiKind;

    /// Every declared attribute with its current value.
    fn attributes(&self) -> Vec<(&'static str, ConfigValue)>;

    /// Run every attribute through the validator.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidSession` naming every field that did
    /// not pass.
    fn validate(&self) -> Result<(), ValidationError> {
        let invalid: Vec<String> = self
            .attributes()
            .into_iter()
            .filter(|(key, value)| !matches!(is_valid_attribute(key, value), Ok(true)))
            .map(|(key, _)| key.to_string())
            .collect();

        if invalid.is_empty() {
            debug!("The provided {} session passed validation", self.kind());
            Ok(())
        } else {
            error!("The provided {} session failed validation", self.kind());
            Err(ValidationError::InvalidSession {
                kind: self.kind().to_string(),
                fields: invalid,
            })
        }
    }
}

/// Precondition check for remote operations: the session as a whole and
/// every additional argument must be valid.
///
/// # Errors
///
/// Returns the first `ValidationError` encountered.
pub fn guard(
    session: &impl Validatable,
    arguments: &[(&str, ConfigValue)],
) -> Result<(), ValidationError> {
    session.validate()?;
    for (key, value) in arguments {
        validate_attribute(key, value)?;
    }
    Ok(())
}

fn invalid(key: &str) -> ValidationError {
    ValidationError::InvalidAttribute {
        key: key.to_string(),
    }
}

fn expect_str<'a>(key: &str, value: &'a ConfigValue) -> Result<&'a str, ValidationError> {
    validate_attribute(key, value)?;
    value.as_str().ok_or_else(|| invalid(key))
}

fn expect_bool(key: &str, value: &ConfigValue) -> Result<bool, ValidationError> {
    validate_attribute(key, value)?;
    value.as_bool().ok_or_else(|| invalid(key))
}

fn optional_sandbox_id(key: &str, value: &ConfigValue) -> Result<Option<SandboxId>, ValidationError> {
    validate_attribute(key, value)?;
    match value {
        ConfigValue::Null => Ok(None),
        ConfigValue::String(id) => SandboxId::new(id.as_str()).map(Some),
        _ => Err(invalid(key)),
    }
}

fn default_build_id() -> Result<BuildId, ValidationError> {
    BuildId::new(chrono::Utc::now().format("%F_%H-%M-%S").to_string())
}

/// Fields shared by every session kind.
#[derive(Debug, Clone, PartialEq)]
struct SessionBase {
    base_url: BaseUrl,
    version: BTreeMap<String, String>,
    app_id: AppId,
}

impl SessionBase {
    fn new(kind: ApiKind, app_id: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            base_url: BaseUrl::new(DEFAULT_BASE_URL)?,
            version: kind
                .default_versions()
                .iter()
                .map(|(endpoint, version)| ((*endpoint).to_string(), (*version).to_string()))
                .collect(),
            app_id: AppId::new(app_id)?,
        })
    }

    /// Apply a common attribute. Returns `false` if `key` is not common.
    fn set(&mut self, key: &str, value: &ConfigValue) -> Result<bool, ValidationError> {
        match key {
            "base_url" => self.base_url = BaseUrl::new(expect_str(key, value)?)?,
            "app_id" => self.app_id = AppId::new(expect_str(key, value)?)?,
            "version" => {
                validate_attribute(key, value)?;
                let versions = value.as_map().ok_or_else(|| invalid(key))?;
                for (endpoint, version) in versions {
                    let version = version.as_str().ok_or_else(|| invalid(key))?;
                    self.version.insert(endpoint.clone(), version.to_string());
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn attributes(&self) -> Vec<(&'static str, ConfigValue)> {
        let version: ConfigMap = self
            .version
            .iter()
            .map(|(endpoint, version)| (endpoint.clone(), ConfigValue::from(version.as_str())))
            .collect();
        vec![
            ("base_url", ConfigValue::from(self.base_url.as_str())),
            ("version", ConfigValue::Map(version)),
            ("app_id", ConfigValue::from(self.app_id.as_str())),
        ]
    }
}

/// Versioned endpoint access shared by all sessions.
#[allow(async_fn_in_trait)]
pub trait ApiSession: Validatable {
    fn base_url(&self) -> &BaseUrl;

    fn versions(&self) -> &BTreeMap<String, String>;

    fn app_id(&self) -> &AppId;

    /// `base_url + version + "/" + endpoint`
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint name is invalid or has no configured
    /// version.
    fn endpoint_url(&self, endpoint: &str) -> Result<String, ApiError> {
        validate_attribute("endpoint", &ConfigValue::from(endpoint))?;
        let version = self
            .versions()
            .get(endpoint)
            .ok_or_else(|| ApiError::UnknownEndpoint(endpoint.to_string()))?;
        Ok(format!("{}{}/{}", self.base_url(), version, endpoint))
    }

    /// GET an endpoint of this session's API.
    ///
    /// # Errors
    ///
    /// Propagates endpoint resolution and transport errors.
    async fn http_get<T: XmlTransport>(
        &self,
        transport: &T,
        endpoint: &str,
        params: Vec<(String, String)>,
    ) -> Result<XmlElement, ApiError> {
        let request = XmlRequest::new(Verb::Get, self.endpoint_url(endpoint)?).with_params(params);
        transport.http_request(request).await
    }

    /// POST to an endpoint of this session's API, optionally with a body.
    ///
    /// # Errors
    ///
    /// Propagates endpoint resolution and transport errors.
    async fn http_post<T: XmlTransport>(
        &self,
        transport: &T,
        endpoint: &str,
        params: Vec<(String, String)>,
        body: Option<(Vec<u8>, &str)>,
    ) -> Result<XmlElement, ApiError> {
        let mut request =
            XmlRequest::new(Verb::Post, self.endpoint_url(endpoint)?).with_params(params);
        if let Some((data, content_type)) = body {
            request = request
                .with_header("Content-Type", content_type)
                .with_body(data);
        }
        transport.http_request(request).await
    }
}

macro_rules! impl_api_session {
    ($session:ty) => {
        impl ApiSession for $session {
            fn base_url(&self) -> &BaseUrl {
                &self.base.base_url
            }

            fn versions(&self) -> &BTreeMap<String, String> {
                &self.base.version
            }

            fn app_id(&self) -> &AppId {
                &self.base.app_id
            }
        }
    };
}

/// Session for the Upload API
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    base: SessionBase,
    build_dir: PathBuf,
    build_id: BuildId,
    sandbox_id: Option<SandboxId>,
    scan_all_nonfatal_top_level_modules: bool,
    auto_scan: bool,
}

impl UploadSession {
    /// Create an upload session with default values for everything but the
    /// application id.
    ///
    /// # Errors
    ///
    /// Returns an error if `app_id` is not a whole number.
    pub fn new(app_id: &str) -> Result<Self, ValidationError> {
        Self {
            base: SessionBase::new(ApiKind::Upload, app_id)?,
            build_dir: PathBuf::new(),
            build_id: default_build_id()?,
            sandbox_id: None,
            scan_all_nonfatal_top_level_modules: true,
            auto_scan: true,
        }
        .with_build_dir(PathBuf::from(DEFAULT_BUILD_DIR))
    }

    /// Return a copy with `key` set to `value`.
    ///
    /// Keys the upload session does not declare are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is invalid for `key`.
    pub fn with_attribute(mut self, key: &str, value: &ConfigValue) -> Result<Self, ValidationError> {
        if self.base.set(key, value)? {
            return Ok(self);
        }

        match key {
            "build_dir" => {
                validate_attribute(key, value)?;
                self.build_dir = value.as_path().ok_or_else(|| invalid(key))?.to_path_buf();
            }
            "build_id" => self.build_id = BuildId::new(expect_str(key, value)?)?,
            "sandbox_id" => self.sandbox_id = optional_sandbox_id(key, value)?,
            "scan_all_nonfatal_top_level_modules" => {
                self.scan_all_nonfatal_top_level_modules = expect_bool(key, value)?;
            }
            "auto_scan" => self.auto_scan = expect_bool(key, value)?,
            _ => debug!("Ignoring {key}, which is not an upload session attribute"),
        }
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if the URL is malformed or invalid.
    pub fn with_base_url(self, base_url: &str) -> Result<Self, ValidationError> {
        self.with_attribute("base_url", &ConfigValue::from(base_url))
    }

    /// # Errors
    ///
    /// Returns an error if the path value is rejected.
    pub fn with_build_dir(self, build_dir: PathBuf) -> Result<Self, ValidationError> {
        self.with_attribute("build_dir", &ConfigValue::from(build_dir))
    }

    /// # Errors
    ///
    /// Returns an error if the id contains reserved characters.
    pub fn with_build_id(self, build_id: &str) -> Result<Self, ValidationError> {
        self.with_attribute("build_id", &ConfigValue::from(build_id))
    }

    /// # Errors
    ///
    /// Returns an error if the id is not a whole number.
    pub fn with_sandbox_id(self, sandbox_id: Option<&str>) -> Result<Self, ValidationError> {
        self.with_attribute("sandbox_id", &ConfigValue::from(sandbox_id))
    }

    /// # Errors
    ///
    /// Never fails for a boolean, kept fallible for symmetry with the other setters.
    pub fn with_auto_scan(self, auto_scan: bool) -> Result<Self, ValidationError> {
        self.with_attribute("auto_scan", &ConfigValue::from(auto_scan))
    }

    /// # Errors
    ///
    /// Never fails for a boolean, kept fallible for symmetry with the other setters.
    pub fn with_scan_all_nonfatal_top_level_modules(
        self,
        scan_all: bool,
    ) -> Result<Self, ValidationError> {
        self.with_attribute(
            "scan_all_nonfatal_top_level_modules",
            &ConfigValue::from(scan_all),
        )
    }

    #[must_use]
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    #[must_use]
    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    #[must_use]
    pub fn sandbox_id(&self) -> Option<&SandboxId> {
        self.sandbox_id.as_ref()
    }

    #[must_use]
    pub fn scan_all_nonfatal_top_level_modules(&self) -> bool {
        self.scan_all_nonfatal_top_level_modules
    }

    #[must_use]
    pub fn auto_scan(&self) -> bool {
        self.auto_scan
    }
}

impl Validatable for UploadSession {
    fn kind(&self) -> ApiKind {
        ApiKind::Upload
    }

    fn attributes(&self) -> Vec<(&'static str, ConfigValue)> {
        let mut attributes = self.base.attributes();
        attributes.extend([
            ("build_dir", ConfigValue::from(self.build_dir.as_path())),
            ("build_id", ConfigValue::from(self.build_id.as_str())),
            (
                "sandbox_id",
                ConfigValue::from(self.sandbox_id.as_ref().map(SandboxId::as_str)),
            ),
            (
                "scan_all_nonfatal_top_level_modules",
                ConfigValue::from(self.scan_all_nonfatal_top_level_modules),
            ),
            ("auto_scan", ConfigValue::from(self.auto_scan)),
        ]);
        attributes
    }
}

impl_api_session!(UploadSession);

/// Session for the Results API
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsSession {
    base: SessionBase,
    ignore_compliance_status: bool,
}

impl ResultsSession {
    /// # Errors
    ///
    /// Returns an error if `app_id` is not a whole number.
    pub fn new(app_id: &str) -> Result<Self, ValidationError> {
        Self {
            base: SessionBase::new(ApiKind::Results, app_id)?,
            ignore_compliance_status: false,
        }
        .with_ignore_compliance_status(false)
    }

    /// Return a copy with `key` set to `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is invalid for `key`.
    pub fn with_attribute(mut self, key: &str, value: &ConfigValue) -> Result<Self, ValidationError> {
        if self.base.set(key, value)? {
            return Ok(self);
        }

        match key {
            "ignore_compliance_status" => self.ignore_compliance_status = expect_bool(key, value)?,
            _ => debug!("Ignoring {key}, which is not a results session attribute"),
        }
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if the URL is malformed or invalid.
    pub fn with_base_url(self, base_url: &str) -> Result<Self, ValidationError> {
        self.with_attribute("base_url", &ConfigValue::from(base_url))
    }

    /// # Errors
    ///
    /// Never fails for a boolean, kept fallible for symmetry with the other setters.
    pub fn with_ignore_compliance_status(self, ignore: bool) -> Result<Self, ValidationError> {
        self.with_attribute("ignore_compliance_status", &ConfigValue::from(ignore))
    }

    #[must_use]
    pub fn ignore_compliance_status(&self) -> bool {
        self.ignore_compliance_status
    }
}

impl Validatable for ResultsSession {
    fn kind(&self) -> ApiKind {
        ApiKind::Results
    }

    fn attributes(&self) -> Vec<(&'static str, ConfigValue)> {
        let mut attributes = self.base.attributes();
        attributes.push((
            "ignore_compliance_status",
            ConfigValue::from(self.ignore_compliance_status),
        ));
        attributes
    }
}

impl_api_session!(ResultsSession);

/// Session for the Sandbox API
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSession {
    base: SessionBase,
    build_id: BuildId,
    sandbox_id: Option<SandboxId>,
    sandbox_name: Option<SandboxName>,
}

impl SandboxSession {
    /// # Errors
    ///
    /// Returns an error if `app_id` is not a whole number.
    pub fn new(app_id: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            base: SessionBase::new(ApiKind::Sandbox, app_id)?,
            build_id: default_build_id()?,
            sandbox_id: None,
            sandbox_name: None,
        })
    }

    /// Return a copy with `key` set to `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is invalid for `key`.
    pub fn with_attribute(mut self, key: &str, value: &ConfigValue) -> Result<Self, ValidationError> {
        if self.base.set(key, value)? {
            return Ok(self);
        }

        match key {
            "build_id" => self.build_id = BuildId::new(expect_str(key, value)?)?,
            "sandbox_id" => self.sandbox_id = optional_sandbox_id(key, value)?,
            "sandbox_name" => self.sandbox_name = Some(SandboxName::new(expect_str(key, value)?)?),
            _ => debug!("Ignoring {key}, which is not a sandbox session attribute"),
        }
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if the URL is malformed or invalid.
    pub fn with_base_url(self, base_url: &str) -> Result<Self, ValidationError> {
        self.with_attribute("base_url", &ConfigValue::from(base_url))
    }

    /// # Errors
    ///
    /// Returns an error if the name contains a backslash or is empty.
    pub fn with_sandbox_name(self, sandbox_name: &str) -> Result<Self, ValidationError> {
        self.with_attribute("sandbox_name", &ConfigValue::from(sandbox_name))
    }

    /// # Errors
    ///
    /// Returns an error if the id is not a whole number.
    pub fn with_sandbox_id(self, sandbox_id: Option<&str>) -> Result<Self, ValidationError> {
        self.with_attribute("sandbox_id", &ConfigValue::from(sandbox_id))
    }

    #[must_use]
    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    #[must_use]
    pub fn sandbox_id(&self) -> Option<&SandboxId> {
        self.sandbox_id.as_ref()
    }

    #[must_use]
    pub fn sandbox_name(&self) -> Option<&SandboxName> {
        self.sandbox_name.as_ref()
    }
}

impl Validatable for SandboxSession {
    fn kind(&self) -> ApiKind {
        ApiKind::Sandbox
    }

    fn attributes(&self) -> Vec<(&'static str, ConfigValue)> {
        let mut attributes = self.base.attributes();
        attributes.push(("build_id", ConfigValue::from(self.build_id.as_str())));
        attributes.push((
            "sandbox_id",
            ConfigValue::from(self.sandbox_id.as_ref().map(SandboxId::as_str)),
        ));
        if let Some(name) = &self.sandbox_name {
            attributes.push(("sandbox_name", ConfigValue::from(name.as_str())));
        }
        attributes
    }
}

impl_api_session!(SandboxSession);
