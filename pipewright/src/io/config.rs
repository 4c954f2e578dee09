//! Agent configuration stored in `pipewright.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::DEFAULT_MAX_ATTEMPTS;

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pipewright.toml";

/// Agent configuration (TOML).
///
/// Missing fields default to the values the agent was designed around, so an
/// empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipewrightConfig {
    /// Directory holding the tabular input files.
    pub data_dir: PathBuf,

    /// Directory for per-run workspaces and attempt logs.
    pub state_dir: PathBuf,

    /// Corrective rounds allowed after the initial execution.
    pub max_attempts: u32,

    /// Give every attempt a fresh workspace instead of sharing one per run.
    pub isolate_attempts: bool,

    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
    pub output: OutputConfig,
}

/// Which remote backend serves generation requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,
    /// Model identifier sent with every request.
    pub name: String,
    pub temperature: f64,
    pub http_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            name: "gemini-2.5-flash".to_string(),
            temperature: 0.2,
            http_timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter command; the bootstrap (if enabled) and script path are appended.
    pub interpreter: Vec<String>,

    /// Launch through the Python bootstrap that pre-binds `bindings`.
    /// Disable to run the script path directly with `interpreter`.
    pub bootstrap: bool,

    /// Wall-clock limit for one candidate execution.
    pub execution_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Modules pre-bound in the program namespace (alias -> module).
    pub bindings: BTreeMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            bootstrap: true,
            execution_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            bindings: default_bindings(),
        }
    }
}

fn default_bindings() -> BTreeMap<String, String> {
    [("pd", "pandas"), ("np", "numpy"), ("os", "os")]
        .into_iter()
        .map(|(alias, module)| (alias.to_string(), module.to_string()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    /// Final location of the unified dataset. The generated program writes a
    /// file with this name into its workspace.
    pub dataset: PathBuf,

    /// Where the lineage report is written.
    pub report: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("tmf_eda_central_data.csv"),
            report: PathBuf::from("data_cleaning_and_lineage_report.md"),
        }
    }
}

impl OutputConfig {
    /// File name the generated program is told to write.
    pub fn dataset_file_name(&self) -> Result<String> {
        self.dataset
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("output.dataset must name a file"))
    }
}

impl Default for PipewrightConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            state_dir: PathBuf::from(".pipewright"),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            isolate_attempts: true,
            model: ModelConfig::default(),
            sandbox: SandboxConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl PipewrightConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must be non-empty"));
        }
        if self.model.http_timeout_secs == 0 {
            return Err(anyhow!("model.http_timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow!("model.temperature must be within 0.0..=2.0"));
        }
        if self.sandbox.interpreter.is_empty() || self.sandbox.interpreter[0].trim().is_empty() {
            return Err(anyhow!("sandbox.interpreter must be a non-empty array"));
        }
        if self.sandbox.execution_timeout_secs == 0 {
            return Err(anyhow!("sandbox.execution_timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        for (alias, module) in &self.sandbox.bindings {
            if !is_identifier(alias) {
                return Err(anyhow!("sandbox.bindings alias '{alias}' is not an identifier"));
            }
            if !module.split('.').all(is_identifier) {
                return Err(anyhow!("sandbox.bindings module '{module}' is not a module path"));
            }
        }
        self.output.dataset_file_name()?;
        if self.output.report.as_os_str().is_empty() {
            return Err(anyhow!("output.report must be non-empty"));
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipewrightConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipewrightConfig> {
    if !path.exists() {
        let cfg = PipewrightConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipewrightConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipewrightConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
