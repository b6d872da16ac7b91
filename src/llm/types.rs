use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Speaker of a pipe message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One chat turn sent to a pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of `POST /v1/pipes/run`. Always non-streaming.
#[derive(Debug, Clone, Serialize)]
pub struct PipeRequest {
    pub name: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl PipeRequest {
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
            variables: BTreeMap::new(),
        }
    }

    /// Bind a `{{key}}` template variable.
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// Token counts reported for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RunDetails {
    model: Option<String>,
    usage: Option<TokenUsage>,
}

/// Body returned by a pipe run.
#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    pub success: bool,
    pub completion: String,
    #[serde(default)]
    raw: Option<RunDetails>,
}

impl PipeResponse {
    /// Model that served the run, when reported.
    pub fn model(&self) -> Option<&str> {
        self.raw.as_ref()?.model.as_deref()
    }

    /// Token usage, when reported.
    pub fn usage(&self) -> Option<TokenUsage> {
        self.raw.as_ref()?.usage
    }
}

/// Body of `POST /v1/pipes`, creating or updating a scoring pipe.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePipeRequest {
    pub name: String,
    pub description: String,
    pub model: String,
    pub upsert: bool,
    pub json: bool,
    pub temperature: f64,
    pub messages: Vec<Message>,
}

impl CreatePipeRequest {
    /// JSON-output pipe at low temperature, upserted so redeploys are harmless.
    pub fn scoring(
        name: impl Into<String>,
        description: impl Into<String>,
        model: impl Into<String>,
        system_prompt: &str,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            model: model.into(),
            upsert: true,
            json: true,
            temperature: 0.2,
            messages: vec![Message::system(system_prompt)],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreatedPipe {
    pub name: String,
}

/// Extract the JSON object embedded in a completion.
///
/// Models sometimes wrap the object in a code fence or prose; the outermost
/// `{ ... }` span is parsed.
pub fn extract_json_object(completion: &str) -> Option<Value> {
    let text = completion.trim();
    let as_object = |candidate: &str| match serde_json::from_str::<Value>(candidate) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    };

    as_object(text).or_else(|| {
        let open = text.find('{')?;
        let close = text.rfind('}')?;
        (open < close).then(|| as_object(&text[open..=close])).flatten()
    })
}
