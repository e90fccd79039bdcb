//! Scripted transport for exercising XML API workflows without a network.
//!
//! Responses are replayed in order and pass through
//! [`interpret_response`](crate::client::interpret_response), so status codes,
//! `<error>` documents and malformed bodies behave exactly as they would
//! against Veracode.

use crate::client::{XmlRequest, XmlTransport, interpret_response};
use crate::xml::XmlElement;
use crate::ApiError;
use std::cell::RefCell;
use std::collections::VecDeque;

enum Scripted {
    Response(u16, String),
    Failure(ApiError),
}

/// A transport that answers requests from a fixed script and records them.
#[derive(Default)]
pub struct ScriptedTransport {
    script: RefCell<VecDeque<Scripted>>,
    requests: RefCell<Vec<XmlRequest>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw HTTP status and body.
    #[must_use]
    pub fn respond(self, status: u16, body: impl Into<String>) -> Self {
        self.script
            .borrow_mut()
            .push_back(Scripted::Response(status, body.into()));
        self
    }

    /// Queue a transport failure.
    #[must_use]
    pub fn fail(self, error: ApiError) -> Self {
        self.script.borrow_mut().push_back(Scripted::Failure(error));
        self
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<XmlRequest> {
        self.requests.borrow().clone()
    }

    /// Endpoint names of every request received so far, in order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.endpoint().to_string())
            .collect()
    }

    /// Number of scripted responses not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.borrow().len()
    }
}

impl XmlTransport for ScriptedTransport {
    async fn http_request(&self, request: XmlRequest) -> Result<XmlElement, ApiError> {
        let endpoint = request.endpoint().to_string();
        self.requests.borrow_mut().push(request);

        match self.script.borrow_mut().pop_front() {
            Some(Scripted::Response(status, body)) => interpret_response(status, body.as_bytes()),
            Some(Scripted::Failure(error)) => Err(error),
            None => Err(ApiError::Connection(format!(
                "no scripted response left for {endpoint}"
            ))),
        }
    }
}
