use super::TranslationBackend;
use crate::error::{BackendError, CallShape};
use crate::pipeline::prompts::payload_input_json;

/// Offline backend: answers every batch with its own input, so a run
/// exercises the whole pipeline without a network service.
#[derive(Debug, Default)]
pub struct EchoBackend;

impl EchoBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TranslationBackend for EchoBackend {
    fn engine(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo"
    }

    fn shapes(&self) -> &[CallShape] {
        &[CallShape::Invoke]
    }

    fn invoke(&self, prompt: &str, _temperature: f32) -> Result<String, BackendError> {
        Ok(payload_input_json(prompt).unwrap_or(prompt).to_string())
    }
}
