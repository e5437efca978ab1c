use serde::{Deserialize, Serialize};

use super::openai_compat::truncate_body;
use super::{http_client, TranslationBackend};
use crate::error::{BackendError, CallShape, ConfigError};
use crate::pipeline::config::EngineSettings;
use crate::pipeline::prompts::INPUT_JSON_MARKER;

const MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<PartOut<'a>>,
}

#[derive(Debug, Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Debug, Deserialize)]
struct PartIn {
    #[serde(default)]
    text: Option<String>,
}

/// Google Generative Language `generateContent` client.
pub struct GeminiBackend {
    client: reqwest::blocking::Client,
    engine: String,
    model: String,
    endpoint: String,
    api_key: String,
}

/// Concatenated text parts of the first candidate.
pub(crate) fn parse_generate_response(body: &str) -> Result<String, BackendError> {
    let resp: GenerateResponse = serde_json::from_str(body)?;
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(BackendError::EmptyResponse);
    }
    Ok(text.trim().to_string())
}

/// Moves the instructions of a batch payload into `systemInstruction`.
fn split_system(prompt: &str) -> (Option<&str>, &str) {
    match prompt.split_once(INPUT_JSON_MARKER) {
        Some((system, input)) => (Some(system), input),
        None => (None, prompt),
    }
}

impl GeminiBackend {
    pub fn new(engine: &EngineSettings, api_key: String) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client()?,
            engine: engine.name.clone(),
            model: engine.model.clone(),
            endpoint: engine.endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn generate(&self, prompt: &str, temperature: f32) -> Result<String, BackendError> {
        let (system, input) = split_system(prompt);
        let req = GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![PartOut { text: input }],
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
            system_instruction: system.map(|text| Content {
                role: None,
                parts: vec![PartOut { text }],
            }),
        };
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
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
        parse_generate_response(&body)
    }
}

impl TranslationBackend for GeminiBackend {
    fn engine(&self) -> &str {
        &self.engine
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn shapes(&self) -> &[CallShape] {
        &[CallShape::Sequential, CallShape::Invoke]
    }

    fn sequential(&self, prompts: &[String], temperature: f32) -> Result<Vec<String>, BackendError> {
        prompts.iter().map(|p| self.generate(p, temperature)).collect()
    }

    fn invoke(&self, prompt: &str, temperature: f32) -> Result<String, BackendError> {
        self.generate(prompt, temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_candidate_parts() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"[{\"id\":\"P0\","},{"text":"\"text\":\"t\"}]"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(
            parse_generate_response(body).expect("text"),
            r#"[{"id":"P0","text":"t"}]"#
        );
    }

    #[test]
    fn blocked_or_empty_candidates_are_empty_responses() {
        let blocked = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        assert!(matches!(parse_generate_response(blocked), Err(BackendError::EmptyResponse)));
        assert!(matches!(parse_generate_response("{}"), Err(BackendError::EmptyResponse)));
    }

    #[test]
    fn batch_instructions_become_system_text() {
        let prompt = format!("Translate.{INPUT_JSON_MARKER}[]");
        assert_eq!(split_system(&prompt), (Some("Translate."), "[]"));
        assert_eq!(split_system("plain"), (None, "plain"));
    }

    #[test]
    fn request_body_uses_camel_case() {
        let req = GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![PartOut { text: "x" }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.5,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
            system_instruction: None,
        };
        let v = serde_json::to_value(&req).expect("json");
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 4096);
        assert!(v.get("systemInstruction").is_none());
    }
}
