//! The outbound description of one logical request.
//!
//! An envelope is decided once by the caller and may be sent twice: once
//! normally and once more after a session refresh. Bodies are serialized when
//! the envelope is built, never at send time, so a replay carries the same
//! bytes as the first attempt.

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    multipart::{Form, Part},
    Method,
};
use serde::Serialize;

use crate::error::SessionKitError;

/// Whether `method` changes server state and therefore needs the
/// anti-forgery token.
#[must_use]
pub fn is_mutating(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method)
}

/// One part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    /// Form field name.
    pub name: String,
    /// Part contents.
    pub bytes: Vec<u8>,
    /// File name, for file fields.
    pub file_name: Option<String>,
    /// MIME type of the part, e.g. `application/pdf`.
    pub mime: Option<String>,
}

impl MultipartPart {
    /// A plain text field.
    #[must_use]
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: value.into().into_bytes(),
            file_name: None,
            mime: None,
        }
    }

    /// A file field.
    #[must_use]
    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            bytes,
            file_name: Some(file_name.into()),
            mime: Some(mime.into()),
        }
    }

    fn to_part(&self) -> Result<Part, SessionKitError> {
        let mut part = Part::bytes(self.bytes.clone());
        if let Some(file_name) = &self.file_name {
            part = part.file_name(file_name.clone());
        }
        if let Some(mime) = &self.mime {
            part = part.mime_str(mime).map_err(|e| {
                SessionKitError::InvalidHeader(format!("invalid part mime {mime}: {e}"))
            })?;
        }
        Ok(part)
    }
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// A JSON document, already serialized.
    Json(Vec<u8>),
    /// Arbitrary bytes with an optional content type.
    Raw {
        /// Payload bytes.
        bytes: Vec<u8>,
        /// Content type to send, if the caller did not set a header.
        content_type: Option<String>,
    },
    /// A `multipart/form-data` upload. The transport picks the boundary.
    Multipart(Vec<MultipartPart>),
}

impl Body {
    /// Serializes `value` to a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Serialization`] if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, SessionKitError> {
        Ok(Self::Json(serde_json::to_vec(value)?))
    }

    /// Whether this is a multipart upload.
    #[must_use]
    pub const fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart(_))
    }

    pub(crate) fn multipart_form(parts: &[MultipartPart]) -> Result<Form, SessionKitError> {
        let mut form = Form::new();
        for part in parts {
            form = form.part(part.name.clone(), part.to_part()?);
        }
        Ok(form)
    }
}

/// Method, target, headers and body of one logical operation.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    method: Method,
    target: String,
    headers: HeaderMap,
    body: Body,
    skip_csrf: bool,
}

impl RequestEnvelope {
    /// Creates an envelope for `method` on `target`.
    ///
    /// `target` is either an absolute URL or a path relative to the client's
    /// base URL.
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: Body::Empty,
            skip_csrf: false,
        }
    }

    /// `GET target`.
    #[must_use]
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    /// `POST target`.
    #[must_use]
    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    /// `PUT target`.
    #[must_use]
    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    /// `PATCH target`.
    #[must_use]
    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    /// `DELETE target`.
    #[must_use]
    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    /// Adds a header, overriding any default the dispatcher would apply.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::InvalidHeader`] if the name or value is not valid HTTP.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, SessionKitError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SessionKitError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| SessionKitError::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Serializes `value` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Serialization`] if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, SessionKitError> {
        Ok(self.body(Body::json(value)?))
    }

    /// Sends without the anti-forgery header, for endpoints documented as public.
    #[must_use]
    pub const fn skip_csrf(mut self) -> Self {
        self.skip_csrf = true;
        self
    }

    /// The HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// The target URL or path.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Caller-supplied headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body.
    #[must_use]
    pub const fn payload(&self) -> &Body {
        &self.body
    }

    /// Whether the anti-forgery token must be attached.
    #[must_use]
    pub fn needs_csrf(&self) -> bool {
        is_mutating(&self.method) && !self.skip_csrf
    }
}
