//! Results API operations used by the compliance check.
//!
//! `getappbuilds.do` returns one `<application>` element per application the
//! credentials can see, each holding the builds that match the request
//! filters. See <https://analysiscenter.veracode.com/resource/2.0/applicationbuilds.xsd>.

use log::debug;

use crate::ApiError;
use crate::client::XmlTransport;
use crate::session::{ApiSession, ResultsSession, guard};
use crate::value::ConfigValue;
use crate::xml::XmlElement;

/// Results API operations for the Veracode XML Results API
pub struct ResultsApi<'a, T: XmlTransport> {
    transport: &'a T,
}

impl<'a, T: XmlTransport> ResultsApi<'a, T> {
    #[must_use]
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Fetch the `<applicationbuilds>` document.
    ///
    /// # Arguments
    ///
    /// * `results` - The results session
    /// * `only_latest` - Restrict each application to its latest build
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Veracode answers with an
    /// `<error>` document.
    pub async fn get_app_builds(
        &self,
        results: &ResultsSession,
        only_latest: bool,
    ) -> Result<XmlElement, ApiError> {
        guard(results, &[("only_latest", ConfigValue::Bool(only_latest))])?;
        let params = vec![("only_latest".to_string(), only_latest.to_string())];

        let builds = results
            .http_get(self.transport, "getappbuilds.do", params)
            .await?;
        debug!(
            "getappbuilds.do returned {} applications",
            builds.children().len()
        );
        Ok(builds)
    }
}

/// The direct `<application>` child of an `<applicationbuilds>` document
/// whose `app_id` matches.
#[must_use]
pub fn find_application<'d>(app_builds: &'d XmlElement, app_id: &str) -> Option<&'d XmlElement> {
    app_builds
        .children()
        .iter()
        .find(|application| application.attribute("app_id") == Some(app_id))
}

/// The `policy_compliance_status` of the last `<build>` under `application`.
#[must_use]
pub fn policy_compliance_status(application: &XmlElement) -> Option<&str> {
    application
        .find_all("build")
        .pop()
        .and_then(|build| build.attribute("policy_compliance_status"))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::client::Verb;
    use crate::test_utils::ScriptedTransport;
    use crate::xml::parse_xml;

    const APP_BUILDS: &str = r#"<applicationbuilds xmlns="https://analysiscenter.veracode.com/schema/2.0/applicationbuilds" account_id="1"><application app_name="other" app_id="1" industry_vertical="Other" assurance_level="Very High" business_criticality="Very High" origin="Not Specified" modified_date="2019-08-13T14:00:10-04:00" cots="false" business_unit="Not Specified" tags=""><build version="a" build_id="10" policy_compliance_status="Did Not Pass" results_ready="true"/></application><application app_name="app" app_id="1337" industry_vertical="Other" assurance_level="Very High" business_criticality="Very High" origin="Not Specified" modified_date="2019-08-13T14:00:10-04:00" cots="false" business_unit="Not Specified" tags=""><customfield name="Custom 1" value=""/><build version="b" build_id="20" policy_compliance_status="Pass" results_ready="true"><analysis_unit analysis_type="Static" status="Results Ready"/></build></application></applicationbuilds>"#;

    #[test]
    fn test_find_application() {
        let doc = parse_xml(APP_BUILDS.as_bytes()).expect("should parse");
        let application = find_application(&doc, "1337").expect("app present");
        assert_eq!(application.attribute("app_name"), Some("app"));
        assert_eq!(policy_compliance_status(application), Some("Pass"));

        assert!(find_application(&doc, "999").is_none());
    }

    #[test]
    fn test_application_without_builds() {
        let doc = parse_xml(br#"<applicationbuilds><application app_id="5"/></applicationbuilds>"#)
            .expect("should parse");
        let application = find_application(&doc, "5").expect("app present");
        assert_eq!(policy_compliance_status(application), None);
    }

    #[tokio::test]
    async fn test_get_app_builds_request() {
        let transport = ScriptedTransport::new().respond(200, APP_BUILDS);
        let results = ResultsSession::new("1337").expect("valid session");

        let doc = ResultsApi::new(&transport)
            .get_app_builds(&results, true)
            .await
            .expect("request succeeds");
        assert_eq!(doc.children().len(), 2);

        let request = &transport.requests()[0];
        assert_eq!(request.verb, Verb::Get);
        assert_eq!(
            request.url_with_params(),
            "https://analysiscenter.veracode.com/api/4.0/getappbuilds.do?only_latest=true"
        );
    }

    #[tokio::test]
    async fn test_get_app_builds_error_document() {
        let transport =
            ScriptedTransport::new().respond(200, "<error>Access denied.</error>");
        let results = ResultsSession::new("1337").expect("valid session");

        let result = ResultsApi::new(&transport).get_app_builds(&results, true).await;
        assert!(matches!(result, Err(ApiError::Application(message)) if message == "Access denied."));
    }
}
