//! Translation backends. Each backend declares which call shapes it serves;
//! callers try them in a fixed order and use the first that answers.

use std::time::Duration;

use crate::error::{BackendError, CallShape, ConfigError};
use crate::pipeline::config::{EngineSettings, ENGINE_ECHO, ENGINE_GEMINI, ENGINE_GROQ};

pub mod echo;
pub mod gemini;
pub mod openai_compat;

pub use echo::EchoBackend;
pub use gemini::GeminiBackend;
pub use openai_compat::OpenAiCompatibleBackend;

pub const PROBE_ORDER: [CallShape; 3] = [CallShape::Batch, CallShape::Sequential, CallShape::Invoke];

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

pub trait TranslationBackend: Send + Sync {
    fn engine(&self) -> &str;

    fn model(&self) -> &str;

    fn shapes(&self) -> &[CallShape];

    /// Several prompts in as few requests as the service allows.
    fn batch(&self, _prompts: &[String], _temperature: f32) -> Result<Vec<String>, BackendError> {
        Err(BackendError::Unsupported(CallShape::Batch))
    }

    /// One request per prompt, in order.
    fn sequential(&self, _prompts: &[String], _temperature: f32) -> Result<Vec<String>, BackendError> {
        Err(BackendError::Unsupported(CallShape::Sequential))
    }

    fn invoke(&self, _prompt: &str, _temperature: f32) -> Result<String, BackendError> {
        Err(BackendError::Unsupported(CallShape::Invoke))
    }
}

/// Sends one payload through the first declared shape that succeeds. List
/// replies contribute their first element.
pub fn invoke_backend(
    backend: &dyn TranslationBackend,
    payload: &str,
    temperature: f32,
) -> Result<String, BackendError> {
    let declared = backend.shapes();
    let prompts = [payload.to_string()];
    let mut tried: Vec<String> = Vec::new();
    for shape in PROBE_ORDER {
        if !declared.contains(&shape) {
            tried.push(format!("{shape}:missing"));
            continue;
        }
        let res = match shape {
            CallShape::Batch => backend
                .batch(&prompts, temperature)
                .map(|v| v.into_iter().next().unwrap_or_default()),
            CallShape::Sequential => backend
                .sequential(&prompts, temperature)
                .map(|v| v.into_iter().next().unwrap_or_default()),
            CallShape::Invoke => backend.invoke(payload, temperature),
        };
        match res {
            Ok(text) => return Ok(text),
            Err(e) => {
                log::debug!("{} {shape} call failed: {e}", backend.engine());
                tried.push(format!("{shape}:err:{e}"));
            }
        }
    }
    Err(BackendError::Exhausted {
        tried: tried.join(", "),
    })
}

fn lookup_key(vars: &[String]) -> Option<String> {
    vars.iter()
        .filter_map(|v| std::env::var(v).ok())
        .map(|k| k.trim().to_string())
        .find(|k| !k.is_empty())
}

pub(crate) fn http_client() -> Result<reqwest::blocking::Client, ConfigError> {
    reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| ConfigError::InvalidValue {
            key: "http client".to_string(),
            message: e.to_string(),
        })
}

/// Builds the configured backend. Unknown engines and missing credentials
/// are reported before any document is touched.
pub fn from_config(engine: &EngineSettings) -> Result<Box<dyn TranslationBackend>, ConfigError> {
    if engine.name == ENGINE_ECHO {
        return Ok(Box::new(EchoBackend::new()));
    }
    let missing = || ConfigError::MissingCredentials {
        engine: engine.name.clone(),
        vars: engine.api_key_env.clone(),
    };
    match engine.name.as_str() {
        ENGINE_GROQ => {
            let key = lookup_key(&engine.api_key_env).ok_or_else(missing)?;
            Ok(Box::new(OpenAiCompatibleBackend::new(engine, key)?))
        }
        ENGINE_GEMINI => {
            let key = lookup_key(&engine.api_key_env).ok_or_else(missing)?;
            Ok(Box::new(GeminiBackend::new(engine, key)?))
        }
        other => Err(ConfigError::UnsupportedEngine(other.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// Replies from a script, one entry per call; records every payload.
    pub struct ScriptedBackend {
        shapes: Vec<CallShape>,
        replies: Mutex<VecDeque<Result<String, BackendError>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub fn new(replies: Vec<Result<String, BackendError>>) -> Self {
            Self {
                shapes: vec![CallShape::Invoke],
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl TranslationBackend for ScriptedBackend {
        fn engine(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "script"
        }

        fn shapes(&self) -> &[CallShape] {
            &self.shapes
        }

        fn invoke(&self, prompt: &str, _temperature: f32) -> Result<String, BackendError> {
            self.calls.lock().push(prompt.to_string());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(BackendError::EmptyResponse))
        }
    }
}
