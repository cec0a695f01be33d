//! Request construction and action validation.

use crate::protocol::types::{content_type, Content};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The action is not one the protocol recognizes
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),
}

/// Actions recognized by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Search,
}

impl Action {
    /// Wire name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Search => "search",
        }
    }
}

impl FromStr for Action {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(Action::Search),
            other => Err(RequestError::UnsupportedAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable request: an action, its opaque value, and how to encode them.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    action: Action,
    value: Value,
    content_type: &'static str,
    content_encoding: &'static str,
}

impl Request {
    pub fn action(&self) -> Action {
        self.action
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn content_type(&self) -> &str {
        self.content_type
    }

    pub fn content_encoding(&self) -> &str {
        self.content_encoding
    }

    /// The structured content sent on the wire.
    pub fn content(&self) -> Content {
        Content::Json(json!({
            "action": self.action.as_str(),
            "value": self.value,
        }))
    }
}

/// Validates `action` and builds a request carrying `value`.
///
/// # Example
///
/// ```
/// use appwire::request::{create_request, RequestError};
///
/// let request = create_request("search", "ethan").unwrap();
/// assert_eq!(request.content_type(), "text/json");
///
/// assert!(matches!(
///     create_request("bogus", "x"),
///     Err(RequestError::UnsupportedAction(_))
/// ));
/// ```
pub fn create_request(action: &str, value: impl Into<Value>) -> Result<Request, RequestError> {
    let action: Action = action.parse()?;
    Ok(Request {
        action,
        value: value.into(),
        content_type: content_type::JSON,
        content_encoding: "utf-8",
    })
}
