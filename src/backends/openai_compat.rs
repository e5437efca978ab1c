use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{http_client, TranslationBackend};
use crate::error::{BackendError, CallShape, ConfigError};
use crate::pipeline::config::EngineSettings;

/// Combined batch requests carry at most this many prompts.
const MAX_COMBINED_PROMPTS: usize = 10;
const ERROR_BODY_CHARS: usize = 500;

static ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<\s*ITEM[^>]*\bidx\s*=\s*["']?(\d+)["']?[^>]*>(.*?)</\s*ITEM\s*>"#)
        .expect("item regex")
});

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenAI-compatible services such as Groq.
pub struct OpenAiCompatibleBackend {
    client: reqwest::blocking::Client,
    engine: String,
    model: String,
    endpoint: String,
    api_key: String,
}

pub(crate) fn parse_chat_response(body: &str) -> Result<String, BackendError> {
    let resp: ChatResponse = serde_json::from_str(body)?;
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(BackendError::EmptyResponse)?;
    Ok(content.trim().to_string())
}

/// Splits a combined reply back into `n` answers; unmatched slots are empty.
pub(crate) fn split_combined_reply(reply: &str, n: usize) -> Vec<String> {
    let mut out = vec![String::new(); n];
    for caps in ITEM_RE.captures_iter(reply) {
        let Ok(idx) = caps[1].parse::<usize>() else {
            continue;
        };
        if let Some(slot) = out.get_mut(idx) {
            *slot = caps[2].trim().to_string();
        }
    }
    out
}

pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_CHARS).collect()
}

impl OpenAiCompatibleBackend {
    pub fn new(engine: &EngineSettings, api_key: String) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client()?,
            engine: engine.name.clone(),
            model: engine.model.clone(),
            endpoint: engine.endpoint.clone(),
            api_key,
        })
    }

    fn chat(&self, prompt: &str, temperature: f32) -> Result<String, BackendError> {
        let req = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }
        parse_chat_response(&body)
    }
}

impl TranslationBackend for OpenAiCompatibleBackend {
    fn engine(&self) -> &str {
        &self.engine
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn shapes(&self) -> &[CallShape] {
        &[CallShape::Batch, CallShape::Sequential, CallShape::Invoke]
    }

    /// Up to ten prompts travel in one request, tagged with their index;
    /// answers the reply leaves out are fetched one by one.
    fn batch(&self, prompts: &[String], temperature: f32) -> Result<Vec<String>, BackendError> {
        match prompts.len() {
            0 => return Ok(vec![]),
            1 => return Ok(vec![self.chat(&prompts[0], temperature)?]),
            n if n > MAX_COMBINED_PROMPTS => return self.sequential(prompts, temperature),
            _ => {}
        }
        let combined = prompts
            .iter()
            .enumerate()
            .map(|(i, p)| format!("<ITEM idx=\"{i}\">{p}</ITEM>"))
            .collect::<Vec<_>>()
            .join("\n");
        let reply = self.chat(&combined, temperature)?;
        let mut out = split_combined_reply(&reply, prompts.len());
        for (i, slot) in out.iter_mut().enumerate() {
            if slot.is_empty() {
                log::warn!("{}: batch reply missed item {i}, asking for it alone", self.engine);
                *slot = self.chat(&prompts[i], temperature)?;
            }
        }
        Ok(out)
    }

    fn sequential(&self, prompts: &[String], temperature: f32) -> Result<Vec<String>, BackendError> {
        prompts.iter().map(|p| self.chat(p, temperature)).collect()
    }

    fn invoke(&self, prompt: &str, temperature: f32) -> Result<String, BackendError> {
        self.chat(prompt, temperature)
    }
}
