//! Configuration pipeline.
//!
//! The effective configuration is assembled from four sources in increasing
//! precedence: built-in defaults, the YAML config file, environment
//! variables and command line arguments. File and argument configs are
//! normalized into the shape
//!
//! ```yaml
//! loglevel: WARNING
//! workflow: [submit_artifacts, check_compliance]
//! config_file: /abs/path/config.yml
//! api_key_id: ...
//! api_key_secret: ...
//! apis:
//!   upload: {...}
//!   results: {...}
//!   sandbox: {...}
//! ```
//!
//! before they are merged, and the merged result is validated before any
//! session is built from it.

use crate::cli::{Args, DEFAULT_CONFIG_FILE};
use crate::credentials::CredentialError;
use crate::workflow::WorkflowStep;
use easy_sast_api::session::common_attributes;
use easy_sast_api::validation::ALLOWED_LOG_LEVELS;
use easy_sast_api::{
    ApiKind, ConfigMap, ConfigValue, ResultsSession, SandboxSession, UploadSession,
    ValidationError, is_valid_attribute,
};
use log::{debug, error, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_API_KEY_ID: &str = "VERACODE_API_KEY_ID";
pub const ENV_API_KEY_SECRET: &str = "VERACODE_API_KEY_SECRET";

/// Top-level options a config file may set. Secrets are deliberately absent.
pub const LIMITED_OPTIONS: [&str; 3] = ["loglevel", "workflow", "config_file"];

/// Top-level options the command line may set.
pub const ALL_OPTIONS: [&str; 5] = [
    "loglevel",
    "workflow",
    "config_file",
    "api_key_id",
    "api_key_secret",
];

const REQUIRED_TOP_LEVEL: [&str; 3] = ["loglevel", "workflow", "config_file"];
const REQUIRED_API_ATTRIBUTES: [&str; 1] = ["app_id"];
const CONFIG_FILE_SUFFIXES: [&str; 2] = ["yml", "yaml"];

/// Custom error types for configuration handling
#[derive(Debug, Error)]
#[must_use = "Need to handle all error enum types."]
pub enum ConfigError {
    #[error("Unable to read the config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse the config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Config keys must be strings, found {0}")]
    NonStringKey(String),

    #[error("{0} must be a mapping")]
    NotAMapping(String),

    #[error("Unable to normalize the provided loglevel {0}")]
    UnknownLogLevel(String),

    #[error("loglevel must be a string, found {0}")]
    LogLevelType(&'static str),

    #[error("Unable to resolve the path {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("The {api} API config has an invalid {key}")]
    InvalidApiValue { api: String, key: String },

    #[error("The {api} API config is missing the required {attribute} config")]
    MissingApiAttribute { api: String, attribute: String },

    #[error("The top level config has an invalid {0}")]
    InvalidOption(String),

    #[error("The final config does not contain the required {0} config")]
    MissingOption(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// Sessions built from the effective configuration, one per API the
/// requested workflow steps need.
#[derive(Debug, Default)]
pub struct Sessions {
    pub upload: Option<UploadSession>,
    pub results: Option<ResultsSession>,
    pub sandbox: Option<SandboxSession>,
}

fn empty_apis() -> ConfigValue {
    ConfigValue::Map(
        ApiKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), ConfigValue::Map(ConfigMap::new())))
            .collect(),
    )
}

/// The built-in defaults.
#[must_use]
pub fn default_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert(
        "workflow".to_string(),
        ConfigValue::List(
            WorkflowStep::DEFAULT
                .iter()
                .map(|step| ConfigValue::from(step.as_str()))
                .collect(),
        ),
    );
    config.insert("loglevel".to_string(), ConfigValue::from("WARNING"));
    config.insert("apis".to_string(), empty_apis());
    config
}

/// The `apis.<kind>` sub-map, if present.
#[must_use]
pub fn api_config(config: &ConfigMap, kind: ApiKind) -> Option<&ConfigMap> {
    config.get("apis")?.as_map()?.get(kind.as_str())?.as_map()
}

fn api_config_mut(config: &mut ConfigMap, kind: ApiKind) -> Result<&mut ConfigMap, ConfigError> {
    config
        .get_mut("apis")
        .and_then(ConfigValue::as_map_mut)
        .and_then(|apis| apis.get_mut(kind.as_str()))
        .and_then(ConfigValue::as_map_mut)
        .ok_or_else(|| ConfigError::NotAMapping(format!("apis.{kind}")))
}

/// Ensure `apis` and one sub-map per supported API exist.
///
/// # Errors
///
/// Returns `ConfigError::NotAMapping` if `apis` or one of its sub-maps is
/// present but is not a mapping.
pub fn add_apis_to_config(config: &mut ConfigMap) -> Result<(), ConfigError> {
    let apis = config
        .entry("apis".to_string())
        .or_insert_with(|| ConfigValue::Map(ConfigMap::new()))
        .as_map_mut()
        .ok_or_else(|| ConfigError::NotAMapping("apis".to_string()))?;

    for kind in ApiKind::ALL {
        let api = apis
            .entry(kind.as_str().to_string())
            .or_insert_with(|| ConfigValue::Map(ConfigMap::new()));
        if api.as_map().is_none() {
            return Err(ConfigError::NotAMapping(format!("apis.{kind}")));
        }
    }
    Ok(())
}

fn from_yaml(value: serde_yaml::Value) -> Result<ConfigValue, ConfigError> {
    use serde_yaml::Value;

    Ok(match value {
        Value::Null => ConfigValue::Null,
        Value::Bool(b) => ConfigValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ConfigValue::Integer(i),
            None => ConfigValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => ConfigValue::String(s),
        Value::Sequence(items) => {
            ConfigValue::List(items.into_iter().map(from_yaml).collect::<Result<_, _>>()?)
        }
        Value::Mapping(mapping) => ConfigValue::Map(from_yaml_mapping(mapping)?),
        Value::Tagged(tagged) => from_yaml(tagged.value)?,
    })
}

fn from_yaml_mapping(mapping: serde_yaml::Mapping) -> Result<ConfigMap, ConfigError> {
    mapping
        .into_iter()
        .map(|(key, value)| match key {
            serde_yaml::Value::String(key) => Ok((key, from_yaml(value)?)),
            other => Err(ConfigError::NonStringKey(format!("{other:?}"))),
        })
        .collect()
}

/// Read the YAML config file without normalizing it.
///
/// A file whose suffix is not `.yml`/`.yaml` is ignored, as is a file that
/// does not exist. Any other I/O error is returned.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid YAML.
pub fn parse_file_config(config_file: &Path) -> Result<ConfigMap, ConfigError> {
    let allowed = config_file
        .extension()
        .and_then(|suffix| suffix.to_str())
        .is_some_and(|suffix| CONFIG_FILE_SUFFIXES.contains(&suffix));
    if !allowed {
        error!(
            "Suffix for the config file {} is not allowed",
            config_file.display()
        );
        return Ok(ConfigMap::new());
    }

    let content = match std::fs::read_to_string(config_file) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("The config file {} was not found", config_file.display());
            return Ok(ConfigMap::new());
        }
        Err(e) => {
            error!(
                "Unable to read the config file {}: {e}",
                config_file.display()
            );
            return Err(ConfigError::Io {
                path: config_file.to_path_buf(),
                source: e,
            });
        }
    };

    let document: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: config_file.to_path_buf(),
            source,
        })?;

    match document {
        serde_yaml::Value::Null => Ok(ConfigMap::new()),
        serde_yaml::Value::Mapping(mapping) => from_yaml_mapping(mapping),
        other => {
            warn!(
                "The config file {} does not contain a mapping ({other:?}), ignoring it",
                config_file.display()
            );
            Ok(ConfigMap::new())
        }
    }
}

/// Parse and normalize the config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or normalized.
pub fn file_config(config_file: &Path) -> Result<ConfigMap, ConfigError> {
    normalize_config(parse_file_config(config_file)?)
}

/// Secrets from the environment. Unset variables are left out entirely.
pub fn env_config(lookup: impl Fn(&str) -> Option<String>) -> ConfigMap {
    let mut config = ConfigMap::new();
    for (key, variable) in [
        ("api_key_id", ENV_API_KEY_ID),
        ("api_key_secret", ENV_API_KEY_SECRET),
    ] {
        if let Some(value) = lookup(variable) {
            debug!("Found {variable} in the environment");
            config.insert(key.to_string(), ConfigValue::String(value));
        }
    }
    config
}

/// Where a command line key belongs: the API kinds that declare it, unless
/// every kind does, in which case it stays top-level for normalization to
/// push down.
fn args_destinations(key: &str) -> Vec<ApiKind> {
    let declaring: Vec<ApiKind> = ApiKind::ALL
        .into_iter()
        .filter(|kind| kind.declares(key))
        .collect();
    if declaring.len() == ApiKind::ALL.len() {
        Vec::new()
    } else {
        declaring
    }
}

/// The command line arguments as a normalized config.
///
/// Inverted flags are turned around (`--disable-auto-scan` becomes
/// `auto_scan: false`). Flags that were not given contribute nothing.
///
/// # Errors
///
/// Returns an error if the arguments do not normalize.
pub fn args_config(args: &Args) -> Result<ConfigMap, ConfigError> {
    let mut parsed: Vec<(&str, ConfigValue)> = vec![
        ("api_key_id", args.api_key_id.clone().into()),
        ("api_key_secret", args.api_key_secret.clone().into()),
        ("app_id", args.app_id.clone().into()),
        ("build_dir", args.build_dir.clone().into()),
        ("build_id", args.build_id.clone().into()),
        ("sandbox_name", args.sandbox_name.clone().into()),
        ("config_file", args.config_file.clone().into()),
        ("loglevel", args.loglevel().into()),
    ];
    if let Some(workflow) = &args.workflow {
        parsed.push((
            "workflow",
            ConfigValue::List(workflow.iter().map(|step| step.as_str().into()).collect()),
        ));
    }
    if args.disable_auto_scan {
        parsed.push(("auto_scan", ConfigValue::Bool(false)));
    }
    if args.disable_scan_nonfatal_modules {
        parsed.push(("scan_all_nonfatal_top_level_modules", ConfigValue::Bool(false)));
    }
    if args.ignore_compliance_status {
        parsed.push(("ignore_compliance_status", ConfigValue::Bool(true)));
    }

    let mut config = ConfigMap::new();
    add_apis_to_config(&mut config)?;
    for (key, value) in parsed {
        let destinations = args_destinations(key);
        if destinations.is_empty() {
            config.insert(key.to_string(), value);
            continue;
        }
        for kind in destinations {
            api_config_mut(&mut config, kind)?.insert(key.to_string(), value.clone());
        }
    }

    normalize_config(config)
}

/// Normalize a config into the preferred shape and validate its API values.
///
/// # Errors
///
/// Returns an error if `loglevel` is not a string naming a real level, if
/// `apis` has the wrong shape, or if any API config value is invalid.
pub fn normalize_config(mut config: ConfigMap) -> Result<ConfigMap, ConfigError> {
    add_apis_to_config(&mut config)?;

    for attribute in common_attributes() {
        let Some(value) = config.remove(attribute) else {
            continue;
        };
        for kind in ApiKind::ALL {
            api_config_mut(&mut config, kind)?.insert(attribute.to_string(), value.clone());
        }
    }

    match config.get_mut("loglevel") {
        Some(ConfigValue::String(level)) => {
            let upper = level.to_uppercase();
            if !ALLOWED_LOG_LEVELS.contains(&upper.as_str()) {
                error!("Unable to normalize the provided loglevel");
                return Err(ConfigError::UnknownLogLevel(level.clone()));
            }
            *level = upper;
        }
        Some(other) => {
            error!("loglevel must be a string");
            return Err(ConfigError::LogLevelType(other.type_name()));
        }
        None => {}
    }

    let upload = api_config_mut(&mut config, ApiKind::Upload)?;
    if let Some(ConfigValue::String(build_dir)) = upload.get("build_dir") {
        let absolute = std::path::absolute(build_dir).map_err(|source| ConfigError::Path {
            path: PathBuf::from(build_dir),
            source,
        })?;
        upload.insert("build_dir".to_string(), ConfigValue::Path(absolute));
    }

    let config = filter_config(config);

    for kind in ApiKind::ALL {
        let Some(api) = api_config(&config, kind) else {
            continue;
        };
        for (key, value) in api {
            if !is_valid_attribute(key, value)? {
                error!("Unable to validate the normalized config");
                return Err(ConfigError::InvalidApiValue {
                    api: kind.to_string(),
                    key: key.clone(),
                });
            }
        }
    }

    Ok(config)
}

/// Remove every null and every mapping that is, or becomes, empty, at any
/// depth, in one post-order pass. Lists are kept even when they end up empty.
#[must_use]
pub fn filter_config(config: ConfigMap) -> ConfigMap {
    config
        .into_iter()
        .filter_map(|(key, value)| filter_value(value).map(|value| (key, value)))
        .collect()
}

fn filter_value(value: ConfigValue) -> Option<ConfigValue> {
    match value {
        ConfigValue::Null => None,
        ConfigValue::Map(map) => {
            let map = filter_config(map);
            (!map.is_empty()).then_some(ConfigValue::Map(map))
        }
        ConfigValue::List(items) => Some(ConfigValue::List(
            items.into_iter().filter_map(filter_value).collect(),
        )),
        other => Some(other),
    }
}

fn merge_apis(config: &mut ConfigMap, source: &ConfigMap) -> Result<(), ConfigError> {
    for kind in ApiKind::ALL {
        if let Some(settings) = api_config(source, kind) {
            api_config_mut(config, kind)?.extend(settings.clone());
        }
    }
    Ok(())
}

fn copy_options(config: &mut ConfigMap, source: &ConfigMap, options: &[&str]) {
    for option in options {
        if let Some(value) = source.get(*option) {
            config.insert((*option).to_string(), value.clone());
        }
    }
}

/// Assemble and validate the effective configuration.
///
/// # Arguments
///
/// * `args` - Parsed command line arguments
/// * `lookup` - Environment variable lookup, usually `|name| std::env::var(name).ok()`
///
/// # Errors
///
/// Returns an error if any source fails to load or normalize, or if the
/// merged configuration is invalid.
pub fn get_config(
    args: &Args,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigMap, ConfigError> {
    let mut config = default_config();
    let args_config = args_config(args)?;

    let config_file = match args_config.get("config_file").and_then(ConfigValue::as_path) {
        Some(path) => path.to_path_buf(),
        None => std::path::absolute(DEFAULT_CONFIG_FILE).map_err(|source| ConfigError::Path {
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
            source,
        })?,
    };
    let file_config = file_config(&config_file)?;
    let env_config = env_config(lookup);

    merge_apis(&mut config, &file_config)?;
    copy_options(&mut config, &file_config, &LIMITED_OPTIONS);

    config.extend(env_config);

    merge_apis(&mut config, &args_config)?;
    copy_options(&mut config, &args_config, &ALL_OPTIONS);

    is_valid_non_api_config(&config)?;
    is_valid_api_config(&config)?;

    debug!("Assembled a valid configuration");
    Ok(config)
}

/// Validate every top-level option and require the mandatory ones.
///
/// # Errors
///
/// Returns `ConfigError::InvalidOption` or `ConfigError::MissingOption`.
pub fn is_valid_non_api_config(config: &ConfigMap) -> Result<(), ConfigError> {
    for (key, value) in config {
        if key == "apis" {
            continue;
        }
        if !is_valid_attribute(key, value)? {
            error!("Unable to validate the non-api configs");
            return Err(ConfigError::InvalidOption(key.clone()));
        }
    }

    for attribute in REQUIRED_TOP_LEVEL {
        if !config.contains_key(attribute) {
            error!("The final config does not contain the minimum required information");
            return Err(ConfigError::MissingOption(attribute.to_string()));
        }
    }
    Ok(())
}

/// The workflow steps named by the configuration, in order.
///
/// # Errors
///
/// Returns `ConfigError::InvalidOption` if `workflow` is missing, not a list
/// or names an unsupported step.
pub fn workflow_steps(config: &ConfigMap) -> Result<Vec<WorkflowStep>, ConfigError> {
    let invalid = || ConfigError::InvalidOption("workflow".to_string());
    config
        .get("workflow")
        .and_then(ConfigValue::as_list)
        .ok_or_else(invalid)?
        .iter()
        .map(|step| step.as_str().and_then(WorkflowStep::from_name).ok_or_else(invalid))
        .collect()
}

/// Upload and Results configs are always required, the Sandbox config only when non-empty.
fn is_required(config: &ConfigMap, kind: ApiKind) -> bool {
    match kind {
        ApiKind::Sandbox => api_config(config, kind).is_some_and(|api| !api.is_empty()),
        ApiKind::Upload | ApiKind::Results => true,
    }
}

/// Validate the API configs used by the requested workflow steps.
///
/// # Errors
///
/// Returns `ConfigError::MissingApiAttribute` or
/// `ConfigError::InvalidApiValue`.
pub fn is_valid_api_config(config: &ConfigMap) -> Result<(), ConfigError> {
    for step in workflow_steps(config)? {
        for &kind in step.required_apis() {
            if !is_required(config, kind) {
                continue;
            }
            let empty = ConfigMap::new();
            let api = api_config(config, kind).unwrap_or(&empty);

            for attribute in REQUIRED_API_ATTRIBUTES {
                if !api.contains_key(attribute) {
                    error!("The {kind} API config is missing the required {attribute} config");
                    return Err(ConfigError::MissingApiAttribute {
                        api: kind.to_string(),
                        attribute: attribute.to_string(),
                    });
                }
            }

            for (key, value) in api {
                if !is_valid_attribute(key, value)? {
                    error!("Unable to validate the {kind} api config");
                    return Err(ConfigError::InvalidApiValue {
                        api: kind.to_string(),
                        key: key.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn required_app_id(settings: &ConfigMap, kind: ApiKind) -> Result<&str, ConfigError> {
    settings
        .get("app_id")
        .and_then(ConfigValue::as_str)
        .ok_or_else(|| ConfigError::MissingApiAttribute {
            api: kind.to_string(),
            attribute: "app_id".to_string(),
        })
}

fn apply_settings<S>(
    session: S,
    settings: &ConfigMap,
    apply: impl Fn(S, &str, &ConfigValue) -> Result<S, ValidationError>,
) -> Result<S, ConfigError> {
    settings
        .iter()
        .filter(|(key, _)| key.as_str() != "app_id")
        .try_fold(session, |session, (key, value)| {
            apply(session, key.as_str(), value).map_err(ConfigError::from)
        })
}

/// Build the sessions the workflow steps need from their `apis.<kind>`
/// configs. Nothing is built for an API no step uses, and no sandbox session
/// is built unless a sandbox name was configured.
///
/// # Errors
///
/// Returns an error if a needed config lacks an `app_id` or holds a value
/// the session rejects.
pub fn apply_config(config: &ConfigMap, steps: &[WorkflowStep]) -> Result<Sessions, ConfigError> {
    let mut sessions = Sessions::default();
    let empty = ConfigMap::new();

    for step in steps {
        for &kind in step.required_apis() {
            let settings = api_config(config, kind).unwrap_or(&empty);
            match kind {
                ApiKind::Upload if sessions.upload.is_none() => {
                    let session = UploadSession::new(required_app_id(settings, kind)?)?;
                    sessions.upload =
                        Some(apply_settings(session, settings, UploadSession::with_attribute)?);
                }
                ApiKind::Results if sessions.results.is_none() => {
                    let session = ResultsSession::new(required_app_id(settings, kind)?)?;
                    sessions.results =
                        Some(apply_settings(session, settings, ResultsSession::with_attribute)?);
                }
                ApiKind::Sandbox
                    if sessions.sandbox.is_none() && settings.contains_key("sandbox_name") =>
                {
                    let session = SandboxSession::new(required_app_id(settings, kind)?)?;
                    sessions.sandbox =
                        Some(apply_settings(session, settings, SandboxSession::with_attribute)?);
                }
                _ => {}
            }
        }
    }

    Ok(sessions)
}
