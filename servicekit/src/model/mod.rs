use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Opaque handle granted by a receiver together with a received message.
///
/// A lock token is only meaningful to the receiver that produced it and must be
/// handed back exactly once, either to `complete` or to `abandon`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Creates a fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work received from the broker.
///
/// # Examples
///
/// ```no_run
/// use servicekit::model::{LockToken, Message};
///
/// let message = Message::new("order-1", br#"{"total":10}"#.to_vec(), LockToken::generate())
///     .with_content_type("application/json");
/// assert_eq!(message.body_text(), r#"{"total":10}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Unique identifier for the message
    pub id: String,
    /// Opaque payload
    pub body: Vec<u8>,
    /// Acknowledgement handle, valid while the message is checked out
    pub lock_token: LockToken,
    /// MIME type supplied by the producer
    pub content_type: Option<String>,
    /// Application properties, insertion order is irrelevant
    pub properties: HashMap<String, Value>,
    /// When the broker accepted the message
    pub enqueued_at: DateTime<Utc>,
    /// Number of times the message has been handed out, starting at 1
    pub delivery_count: u32,
}

impl Message {
    pub fn new(id: impl Into<String>, body: Vec<u8>, lock_token: LockToken) -> Self {
        Self {
            id: id.into(),
            body,
            lock_token,
            content_type: None,
            properties: HashMap::new(),
            enqueued_at: Utc::now(),
            delivery_count: 1,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    /// Lossy UTF-8 view of the body.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON.
    pub fn body_as_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Looks up a string-valued application property.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Optional parameters for send operations.
///
/// # Examples
///
/// ```no_run
/// use servicekit::model::SendOptions;
///
/// let options = SendOptions::default()
///     .with_content_type("application/json")
///     .with_property("tenant", "acme")
///     .with_message_id("order-42");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// MIME type of the body, unset by default
    pub content_type: Option<String>,
    /// Application properties attached to every message sent with these options
    pub properties: HashMap<String, Value>,
    /// Explicit message id; the broker generates one when unset
    pub message_id: Option<String>,
}

impl SendOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}
