use easy_sast_api::{ApiCredentials, ConfigMap, ConfigValue};
use log::{debug, error};
use secrecy::{ExposeSecret, SecretString};

/// Custom error types for credential operations
#[derive(thiserror::Error, Debug)]
#[must_use = "Need to handle all error enum types."]
pub enum CredentialError {
    #[error("Credential validation failed: {field}")]
    ValidationError { field: String },

    #[error("Missing required credentials: {missing}")]
    MissingCredentials { missing: String },
}

fn secret_option(config: &ConfigMap, field: &str) -> Result<Option<SecretString>, CredentialError> {
    match config.get(field) {
        None | Some(ConfigValue::Null) => Ok(None),
        Some(ConfigValue::String(value)) => Ok(Some(SecretString::from(value.clone()))),
        Some(_) => Err(CredentialError::ValidationError {
            field: field.to_string(),
        }),
    }
}

/// Turn the effective `api_key_id`/`api_key_secret` into the credentials the
/// signing client is built with.
///
/// # Errors
///
/// Returns `CredentialError::MissingCredentials` naming every absent field,
/// or `CredentialError::ValidationError` if either value is malformed.
pub fn configure_credentials(config: &ConfigMap) -> Result<ApiCredentials, CredentialError> {
    let api_key_id = secret_option(config, "api_key_id")?;
    let api_key_secret = secret_option(config, "api_key_secret")?;

    let (api_key_id, api_key_secret) = match (api_key_id, api_key_secret) {
        (Some(id), Some(secret)) => (id, secret),
        (id, secret) => {
            let missing: Vec<&str> = [
                ("api_key_id", id.is_none()),
                ("api_key_secret", secret.is_none()),
            ]
            .into_iter()
            .filter_map(|(field, absent)| absent.then_some(field))
            .collect();
            error!("❌ Veracode API credentials are required");
            error!("💡 Set VERACODE_API_KEY_ID and VERACODE_API_KEY_SECRET or pass --api-key-id and --api-key-secret");
            return Err(CredentialError::MissingCredentials {
                missing: missing.join(", "),
            });
        }
    };

    let credentials = ApiCredentials::new(
        api_key_id.expose_secret().to_string(),
        api_key_secret.expose_secret().to_string(),
    )
    .map_err(|e| {
        error!("❌ Invalid Veracode API credentials: {e}");
        let field = match e {
            easy_sast_api::ValidationError::InvalidAttribute { key } => key,
            _ => "api credentials".to_string(),
        };
        CredentialError::ValidationError { field }
    })?;

    debug!("Configured Veracode API credentials");
    Ok(credentials)
}
