//! Request and response payloads carried inside frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A synthesis request.
///
/// Every field is optional on the wire; the dispatcher applies defaults and
/// rejects a missing or empty `text`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Build a request from a decoded JSON object. Unknown keys are ignored;
    /// known keys with the wrong type are an error.
    pub fn from_object(object: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(object))
    }

    /// True when `text` is absent, null or blank. Checked before the other
    /// fields are typed, so a request without text is always `empty_text`.
    pub fn lacks_text(object: &Map<String, Value>) -> bool {
        match object.get("text") {
            None | Some(Value::Null) => true,
            Some(Value::String(text)) => text.trim().is_empty(),
            Some(_) => false,
        }
    }
}

/// Successful synthesis payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub audio_base64: String,
    pub duration: f64,
    pub sample_rate: u32,
    pub format: String,
}

/// One response per request: either audio or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Success(SynthesisResponse),
    Failure { error: String },
}

impl Response {
    pub fn failure(error: impl Into<String>) -> Self {
        Response::Failure {
            error: error.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Failure { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Response::Failure { error } => Some(error),
            Response::Success(_) => None,
        }
    }
}

impl From<SynthesisResponse> for Response {
    fn from(value: SynthesisResponse) -> Self {
        Response::Success(value)
    }
}
