//! Signed HTTP calls against the Veracode XML APIs.
//!
//! [`SastClient`] signs each request with Veracode HMAC authentication,
//! sends it with reqwest and hands the raw status and body to
//! [`interpret_response`], which is where every response (real or scripted
//! in tests) becomes either a parsed document or a classified [`ApiError`].

use crate::credentials::ApiCredentials;
use crate::validation::validate_attribute;
use crate::value::ConfigValue;
use crate::xml::{XmlElement, parse_xml};
use crate::ApiError;
use log::{debug, error};
use reqwest::Client;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use url::{Position, Url};

const AUTH_SCHEME: &str = "VERACODE-HMAC-SHA-256";
const USER_AGENT: &str = concat!("easy_sast/", env!("CARGO_PKG_VERSION"));

/// HTTP verbs accepted by the XML APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call to an XML API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlRequest {
    pub verb: Verb,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl XmlRequest {
    #[must_use]
    pub fn new(verb: Verb, url: impl Into<String>) -> Self {
        Self {
            verb,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of a query parameter, if present.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Last path segment of the URL, e.g. `createbuild.do`.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or_default()
    }

    /// Full URL including the encoded query string.
    #[must_use]
    pub fn url_with_params(&self) -> String {
        let mut url = String::with_capacity(
            self.url
                .len()
                .saturating_add(self.params.len().saturating_mul(32)),
        );
        url.push_str(&self.url);

        if !self.params.is_empty() {
            url.push('?');
            for (i, (key, value)) in self.params.iter().enumerate() {
                if i > 0 {
                    url.push('&');
                }
                url.push_str(&urlencoding::encode(key));
                url.push('=');
                url.push_str(&urlencoding::encode(value));
            }
        }

        url
    }
}

/// Capability to perform one signed XML API call.
///
/// Implementations must return the parsed document only for a 200 response
/// whose root element is not `<error>`; [`interpret_response`] does exactly
/// that for a raw status and body.
#[allow(async_fn_in_trait)]
pub trait XmlTransport {
    /// # Errors
    ///
    /// Returns a transport variant of [`ApiError`] if the request could not
    /// be completed, `ApiError::Application` for an `<error>` document and
    /// `ApiError::MalformedXml` for an unparsable body.
    async fn http_request(&self, request: XmlRequest) -> Result<XmlElement, ApiError>;
}

/// Turn a raw HTTP status and body into a parsed document or an error.
///
/// # Errors
///
/// Returns `ApiError::HttpStatus` for any status other than 200,
/// `ApiError::MalformedXml` if the body does not parse, and
/// `ApiError::Application` if the document root is `<error>`.
pub fn interpret_response(status: u16, body: &[u8]) -> Result<XmlElement, ApiError> {
    debug!("Received a status code of {status}");
    if status != 200 {
        error!("Encountered an issue with the response status code: {status}");
        return Err(ApiError::HttpStatus { status });
    }

    let parsed = parse_xml(body).inspect_err(|_| {
        error!("Failed to parse the XML response, untrustworthy endpoint");
    })?;
    debug!("parse_xml successful");

    if parsed.is_error() {
        error!("The Veracode API responded with an error message");
        return Err(ApiError::Application(parsed.text().to_string()));
    }

    Ok(parsed)
}

/// Map a reqwest failure onto the matching transport error.
fn classify_transport_error(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        error!("http_request encountered a timeout error: {err}");
        ApiError::Timeout(err.to_string())
    } else if err.is_connect() {
        error!("http_request encountered a connection error: {err}");
        ApiError::Connection(err.to_string())
    } else if err.is_redirect() {
        error!("http_request encountered too many redirects: {err}");
        ApiError::TooManyRedirects(err.to_string())
    } else {
        error!("http_request encountered a request exception error: {err}");
        ApiError::Request(err.to_string())
    }
}

/// HTTP client for the Veracode XML APIs.
///
/// Credentials are passed in explicitly; nothing is read from the process
/// environment.
#[derive(Clone)]
pub struct SastClient {
    credentials: ApiCredentials,
    client: Client,
}

impl SastClient {
    /// Create a new client using the transport defaults for timeouts and
    /// redirects.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Request` if the underlying HTTP client cannot be
    /// built (for example when no TLS roots are available).
    pub fn new(credentials: ApiCredentials) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;
        Ok(Self {
            credentials,
            client,
        })
    }

    /// `Authorization` header for `request` signed at `timestamp` (ms since
    /// the Unix epoch) with `nonce`.
    ///
    /// The signed message covers the key id, the host, the path with the
    /// encoded query string and the HTTP method.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Authentication` if the request URL cannot be parsed
    /// or has no host.
    pub fn authorization(
        &self,
        request: &XmlRequest,
        timestamp: u64,
        nonce: [u8; 16],
    ) -> Result<String, ApiError> {
        let url = Url::parse(&request.url_with_params())
            .map_err(|e| ApiError::Authentication(format!("{}: {e}", request.url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ApiError::Authentication(format!("{} has no host", request.url)))?;
        let resource = &url[Position::BeforePath..Position::AfterQuery];
        let key_id = self.credentials.expose_api_key_id();

        let message = format!(
            "id={key_id}&host={host}&url={resource}&method={}",
            request.verb.method()
        );
        let signature = self.credentials.sign(&nonce, timestamp, &message)?;

        Ok(format!(
            "{AUTH_SCHEME} id={key_id},ts={timestamp},nonce={},sig={signature}",
            hex::encode(nonce)
        ))
    }

    fn authorize_now(&self, request: &XmlRequest) -> Result<String, ApiError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ApiError::Authentication(format!("System time error: {e}")))?;
        let timestamp = u64::try_from(elapsed.as_millis())
            .map_err(|e| ApiError::Authentication(format!("System time error: {e}")))?;

        self.authorization(request, timestamp, rand::random())
    }
}

impl XmlTransport for SastClient {
    async fn http_request(&self, request: XmlRequest) -> Result<XmlElement, ApiError> {
        validate_attribute("verb", &ConfigValue::from(request.verb.as_str()))?;

        let url = request.url_with_params();
        debug!("Querying the {} endpoint with a {}", request.url, request.verb);

        let auth_header = self.authorize_now(&request)?;

        let mut builder = match request.verb {
            Verb::Get => self.client.get(&url),
            Verb::Post => self.client.post(&url),
        }
        .header("Authorization", auth_header);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        interpret_response(status, &body)
    }
}
