//! Policy compliance gate for the latest build of an application.

use easy_sast_api::results::{find_application, policy_compliance_status};
use easy_sast_api::{ApiSession, ResultsApi, ResultsSession, XmlTransport};
use log::{debug, error, warn};

/// Status of a build that passed its policy.
pub const PASS: &str = "Pass";

/// Status reported when no verdict could be retrieved.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, thiserror::Error)]
#[must_use = "Need to handle all error enum types."]
pub enum ComplianceError {
    #[error("Unable to determine the compliance status of app_id {app_id}")]
    Unknown { app_id: String },
}

/// The policy compliance status of the application's latest build.
///
/// Any failure to retrieve or interpret the application builds yields
/// [`UNKNOWN`].
pub async fn get_policy_compliance_status<T: XmlTransport>(
    transport: &T,
    results: &ResultsSession,
) -> String {
    let app_id = results.app_id().as_str();

    debug!("Calling get_app_builds");
    let app_builds = match ResultsApi::new(transport).get_app_builds(results, true).await {
        Ok(app_builds) => app_builds,
        Err(e) => {
            error!("Failed to retrieve the application builds from Veracode: {e}");
            warn!("No builds detected for app_id {app_id}");
            return UNKNOWN.to_string();
        }
    };

    let Some(application) = find_application(&app_builds, app_id) else {
        error!("Unable to find a completed build for app_id {app_id}");
        warn!("No builds detected for app_id {app_id}");
        return UNKNOWN.to_string();
    };
    debug!("Found app_id {app_id}");

    policy_compliance_status(application)
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Whether the latest build passed its policy.
///
/// # Errors
///
/// Returns `ComplianceError::Unknown` if the status could not be determined.
pub async fn in_compliance<T: XmlTransport>(
    transport: &T,
    results: &ResultsSession,
) -> Result<bool, ComplianceError> {
    let status = get_policy_compliance_status(transport, results).await;
    if status == UNKNOWN {
        return Err(ComplianceError::Unknown {
            app_id: results.app_id().to_string(),
        });
    }

    debug!(
        "app_id {} has a compliance status of {status}",
        results.app_id()
    );
    Ok(status == PASS)
}

/// Gate on the compliance status. A failing verdict is tolerated when
/// `ignore_compliance_status` is set, an unknown one never is.
pub async fn check_compliance<T: XmlTransport>(transport: &T, results: &ResultsSession) -> bool {
    let app_id = results.app_id();
    debug!("Checking to see if the latest build for app_id {app_id} is in compliance");

    match in_compliance(transport, results).await {
        Ok(true) => true,
        Ok(false) => {
            warn!("The latest build for app {app_id} was not in compliance");
            results.ignore_compliance_status()
        }
        Err(e) => {
            error!("{e}");
            false
        }
    }
}
