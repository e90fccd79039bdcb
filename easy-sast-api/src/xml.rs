//! Minimal owned XML tree for the Veracode XML API responses.
//!
//! Element and attribute names are stored without their namespace prefix.
//! Document type declarations are rejected so entity expansion never happens.

use crate::ApiError;
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

/// Convert a raw attribute or text byte slice to an owned string
#[inline]
fn attr_to_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

/// An XML element with its attributes, child elements and text content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    /// Local name of the element (namespace prefix removed).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    /// Concatenated text directly inside this element, trimmed.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// This element and every descendant named `name`, in document order.
    #[must_use]
    pub fn find_all(&self, name: &str) -> Vec<&XmlElement> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        if self.name == name {
            found.push(self);
        }
        for child in &self.children {
            child.collect(name, found);
        }
    }

    /// Whether the document is an API error response (`<error>` root).
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.name.to_lowercase() == "error"
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, ApiError> {
        let mut element = Self {
            name: attr_to_string(start.local_name().as_ref()),
            ..Self::default()
        };

        for attr in start.attributes() {
            let attr = attr.map_err(|e| ApiError::MalformedXml(e.to_string()))?;
            let key = attr.key.as_ref();
            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                continue;
            }
            let raw = attr_to_string(&attr.value);
            let value = unescape(&raw)
                .map_err(|e| ApiError::MalformedXml(e.to_string()))?
                .into_owned();
            element
                .attributes
                .push((attr_to_string(attr.key.local_name().as_ref()), value));
        }

        Ok(element)
    }
}

/// Parse an XML API response body into an element tree.
///
/// # Errors
///
/// Returns `ApiError::MalformedXml` if the body is not UTF-8, is not well
/// formed, has no root element, or declares a document type.
pub fn parse_xml(content: &[u8]) -> Result<XmlElement, ApiError> {
    let xml = std::str::from_utf8(content).map_err(|e| ApiError::MalformedXml(e.to_string()))?;
    let mut reader = Reader::from_str(xml);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if root.is_some() && stack.is_empty() {
                    return Err(ApiError::MalformedXml("multiple root elements".to_string()));
                }
                stack.push(XmlElement::from_start(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let element = XmlElement::from_start(e)?;
                attach(element, &mut stack, &mut root)?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| {
                    ApiError::MalformedXml("unexpected closing tag".to_string())
                })?;
                attach(element, &mut stack, &mut root)?;
            }
            Ok(Event::Text(ref e)) => {
                let text = attr_to_string(e);
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                } else if !text.trim().is_empty() {
                    return Err(ApiError::MalformedXml(
                        "text outside of the root element".to_string(),
                    ));
                }
            }
            Ok(Event::GeneralRef(ref e)) => {
                let reference = format!("&{};", attr_to_string(e));
                let resolved = unescape(&reference)
                    .map_err(|e| ApiError::MalformedXml(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&resolved);
                } else {
                    return Err(ApiError::MalformedXml(
                        "reference outside of the root element".to_string(),
                    ));
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&attr_to_string(e));
                }
            }
            Ok(Event::DocType(_)) => {
                return Err(ApiError::MalformedXml(
                    "document type declarations are not permitted".to_string(),
                ));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ApiError::MalformedXml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(ApiError::MalformedXml("unclosed element".to_string()));
    }

    let mut root = root.ok_or_else(|| ApiError::MalformedXml("no root element".to_string()))?;
    trim_text(&mut root);
    Ok(root)
}

fn attach(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<(), ApiError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(ApiError::MalformedXml("multiple root elements".to_string()));
    }
    *root = Some(element);
    Ok(())
}

fn trim_text(element: &mut XmlElement) {
    let trimmed = element.text.trim();
    if trimmed.len() != element.text.len() {
        element.text = trimmed.to_string();
    }
    for child in &mut element.children {
        trim_text(child);
    }
}
