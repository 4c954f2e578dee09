//! Generative-model clients.
//!
//! The [`Generator`] trait is the single seam between the agent and a model
//! backend. Implementations are blocking and bounded by an HTTP timeout.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::io::config::{ModelConfig, Provider};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Environment variable holding the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Environment variable overriding the Ollama host.
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

/// Abstraction over text generation backends.
pub trait Generator {
    /// Send `prompt` and return the response text.
    ///
    /// `Ok(None)` means the backend answered without any text.
    fn generate(&self, prompt: &str) -> Result<Option<String>>;
}

/// Build the generator selected by `config`.
pub fn build_generator(config: &ModelConfig) -> Result<Box<dyn Generator>> {
    let generator: Box<dyn Generator> = match config.provider {
        Provider::Gemini => {
            let api_key = env::var(GEMINI_API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| anyhow!("{GEMINI_API_KEY_ENV} must be set for the gemini provider"))?;
            Box::new(GeminiGenerator::new(config, api_key)?)
        }
        Provider::Ollama => {
            let host = env::var(OLLAMA_HOST_ENV).unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
            Box::new(OllamaGenerator::new(config, &host)?)
        }
    };
    info!(provider = ?config.provider, model = %config.name, "generator ready");
    Ok(generator)
}

fn http_client(config: &ModelConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .context("build HTTP client")
}

/// Google Gemini `generateContent` client.
pub struct GeminiGenerator {
    client: Client,
    url: String,
    api_key: String,
    temperature: f64,
}

impl GeminiGenerator {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            url: format!("{GEMINI_API_BASE}/{}:generateContent", config.name),
            api_key,
            temperature: config.temperature,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        })
    }
}

impl Generator for GeminiGenerator {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<Option<String>> {
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .context("gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("gemini error {status}: {}", truncate(&body, 320));
        }
        let body: Value = response.json().context("invalid gemini response")?;
        let text = gemini_text(&body);
        debug!(
            response_bytes = text.as_ref().map_or(0, String::len),
            finish_reason = body["candidates"][0]["finishReason"].as_str(),
            "gemini responded"
        );
        Ok(text)
    }
}

/// Ollama `/api/chat` client.
pub struct OllamaGenerator {
    client: Client,
    url: String,
    model: String,
    temperature: f64,
}

impl OllamaGenerator {
    pub fn new(config: &ModelConfig, host: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            url: format!("{}/api/chat", host.trim_end_matches('/')),
            model: config.name.clone(),
            temperature: config.temperature,
        })
    }
}

impl Generator for OllamaGenerator {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<Option<String>> {
        let body = json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|err| {
                if err.is_connect() {
                    anyhow!("failed to connect to Ollama at {}; is `ollama serve` running?", self.url)
                } else {
                    anyhow!("ollama request failed: {err}")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("ollama error {status}: {}", truncate(&body, 320));
        }
        let body: Value = response.json().context("invalid ollama response")?;
        let text = ollama_text(&body);
        debug!(response_bytes = text.as_ref().map_or(0, String::len), "ollama responded");
        Ok(text)
    }
}

/// Concatenated text parts of the first Gemini candidate.
fn gemini_text(body: &Value) -> Option<String> {
    let parts = body["candidates"].get(0)?["content"]["parts"].as_array()?;
    let text = parts
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect::<String>();
    non_blank(text)
}

fn ollama_text(body: &Value) -> Option<String> {
    body["message"]["content"]
        .as_str()
        .map(str::to_string)
        .and_then(non_blank)
}

fn non_blank(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
