use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_DIR: &str = ".speaking-test";
const CONFIG_FILE: &str = "config.json";
const HOME_ENV: &str = "SPEAKING_TEST_HOME";
const SECRET_XOR_KEY: &[u8] = b"speaking-test-local-key-v1";

pub const DEFAULT_SESSION_SECS: u64 = 14 * 60;
pub const DEFAULT_PREPARATION_SECS: u64 = 60;
pub const DEFAULT_QUESTION_BUDGET_SECS: u64 = 120;
pub const DEFAULT_MONOLOGUE_BUDGET_SECS: u64 = 120;
pub const DEFAULT_TICK_MILLIS: u64 = 250;
pub const DEFAULT_LEVEL: &str = "B2";
pub const DEFAULT_SCORING_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_SCORING_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:1.5b";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub timing: TimingConfig,
    pub assessment: AssessmentConfig,
    pub groq: GroqConfig,
    pub scoring: ScoringConfig,
    pub persistence: PersistenceConfig,
    pub cache_dir: Option<String>,
    pub input_device_name: Option<String>,
    pub proficiency_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            assessment: AssessmentConfig::default(),
            groq: GroqConfig::default(),
            scoring: ScoringConfig::default(),
            persistence: PersistenceConfig::default(),
            cache_dir: None,
            input_device_name: None,
            proficiency_level: DEFAULT_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub session_secs: u64,
    pub preparation_secs: u64,
    pub question_budget_secs: u64,
    pub monologue_budget_secs: u64,
    pub tick_millis: u64,
    /// Start evaluating a clip as soon as it is captured instead of waiting
    /// for the part boundary.
    pub eager_evaluation: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            session_secs: DEFAULT_SESSION_SECS,
            preparation_secs: DEFAULT_PREPARATION_SECS,
            question_budget_secs: DEFAULT_QUESTION_BUDGET_SECS,
            monologue_budget_secs: DEFAULT_MONOLOGUE_BUDGET_SECS,
            tick_millis: DEFAULT_TICK_MILLIS,
            eager_evaluation: true,
        }
    }
}

impl TimingConfig {
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }

    pub fn preparation(&self) -> Duration {
        Duration::from_secs(self.preparation_secs)
    }

    pub fn question_budget(&self) -> Duration {
        Duration::from_secs(self.question_budget_secs)
    }

    pub fn monologue_budget(&self) -> Duration {
        Duration::from_secs(self.monologue_budget_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    pub url: Option<String>,
    pub api_key_obfuscated: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u8,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key_obfuscated: None,
            timeout_secs: 30,
            max_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroqConfig {
    pub api_key_obfuscated: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key_obfuscated: None,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScorerKind {
    Chat,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Scorers in the order they are tried.
    pub providers: Vec<ScorerKind>,
    pub base_url: String,
    pub model: String,
    pub api_key_obfuscated: Option<String>,
    pub ollama_url: String,
    pub ollama_model: String,
    pub timeout_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            providers: vec![ScorerKind::Chat, ScorerKind::Ollama],
            base_url: DEFAULT_SCORING_BASE_URL.to_string(),
            model: DEFAULT_SCORING_MODEL.to_string(),
            api_key_obfuscated: None,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub url: Option<String>,
    pub token_obfuscated: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u8,
    pub retry_base_millis: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            url: None,
            token_obfuscated: None,
            timeout_secs: 15,
            max_retries: 3,
            retry_base_millis: 500,
        }
    }
}

impl AppConfig {
    /// Overlays secrets and endpoints from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(key) = value("ASSESSMENT_API_KEY") {
            self.assessment.api_key_obfuscated = Some(obfuscate_secret(&key));
        }
        if let Some(key) = value("SCORING_API_KEY") {
            self.scoring.api_key_obfuscated = Some(obfuscate_secret(&key));
        }
        if let Some(key) = value("GROQ_API_KEY") {
            self.groq.api_key_obfuscated = Some(obfuscate_secret(&key));
        }
        if let Some(token) = value("PERSISTENCE_TOKEN") {
            self.persistence.token_obfuscated = Some(obfuscate_secret(&token));
        }
        if let Some(url) = value("ASSESSMENT_URL") {
            self.assessment.url = Some(url);
        }
        if let Some(url) = value("SCORING_BASE_URL") {
            self.scoring.base_url = url;
        }
        if let Some(url) = value("PERSISTENCE_URL") {
            self.persistence.url = Some(url);
        }
    }

    pub fn assessment_key(&self) -> Option<String> {
        reveal(&self.assessment.api_key_obfuscated)
    }

    pub fn groq_key(&self) -> Option<String> {
        reveal(&self.groq.api_key_obfuscated).filter(|k| k.starts_with("gsk_"))
    }

    /// The chat scorer falls back to the Groq key when it targets Groq.
    pub fn scoring_key(&self) -> Option<String> {
        reveal(&self.scoring.api_key_obfuscated).or_else(|| {
            if self.scoring.base_url.contains("groq.com") {
                self.groq_key()
            } else {
                None
            }
        })
    }

    pub fn persistence_token(&self) -> Option<String> {
        reveal(&self.persistence.token_obfuscated)
    }

    pub fn cache_root(&self, home: &Path) -> PathBuf {
        match self.cache_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => home.join("cache"),
        }
    }

    /// One line per section with secrets masked, for the startup log.
    pub fn summary(&self) -> String {
        let masked = |secret: Option<String>| {
            secret
                .map(|s| mask_secret(&s))
                .unwrap_or_else(|| "unset".to_string())
        };
        format!(
            "level={} session={}s prep={}s budget={}s/{}s | assessment url={} key={} | groq key={} | scoring {:?} model={} key={} | persistence url={} token={}",
            self.proficiency_level,
            self.timing.session_secs,
            self.timing.preparation_secs,
            self.timing.question_budget_secs,
            self.timing.monologue_budget_secs,
            self.assessment.url.as_deref().unwrap_or("unset"),
            masked(self.assessment_key()),
            masked(self.groq_key()),
            self.scoring.providers,
            self.scoring.model,
            masked(self.scoring_key()),
            self.persistence.url.as_deref().unwrap_or("unset"),
            masked(self.persistence_token()),
        )
    }
}

/// `$SPEAKING_TEST_HOME`, or `./.speaking-test` when unset.
pub fn home_dir() -> PathBuf {
    std::env::var(HOME_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR))
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILE)
}

pub fn load_or_create(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        let config = AppConfig::default();
        save(path, &config)?;
        return Ok(config);
    }

    let raw = fs::read_to_string(path)?;
    match serde_json::from_str::<AppConfig>(&raw) {
        Ok(mut config) => {
            normalize_config(&mut config);
            Ok(config)
        }
        Err(e) => {
            tracing::warn!("Config at {} is unreadable ({}), resetting", path.display(), e);
            let backup = path.with_extension("json.bak");
            let _ = fs::copy(path, backup);
            let config = AppConfig::default();
            save(path, &config)?;
            Ok(config)
        }
    }
}

pub fn save(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

/// Maps free-form level hints onto CEFR labels.
pub fn normalize_level(input: &str) -> String {
    let upper = input.trim().to_ascii_uppercase();
    match upper.as_str() {
        "A1" | "A2" | "B1" | "B2" | "C1" | "C2" => upper,
        "BEGINNER" => "A2".to_string(),
        "INTERMEDIATE" => "B1".to_string(),
        "UPPER-INTERMEDIATE" | "UPPER INTERMEDIATE" => "B2".to_string(),
        "ADVANCED" => "C1".to_string(),
        "PROFICIENT" => "C2".to_string(),
        _ => DEFAULT_LEVEL.to_string(),
    }
}

fn normalize_config(config: &mut AppConfig) {
    config.proficiency_level = normalize_level(&config.proficiency_level);
    config.input_device_name = normalize_device_name(config.input_device_name.clone());
    if config.timing.tick_millis == 0 {
        config.timing.tick_millis = DEFAULT_TICK_MILLIS;
    }
    if config.timing.question_budget_secs == 0 {
        config.timing.question_budget_secs = DEFAULT_QUESTION_BUDGET_SECS;
    }
    if config.timing.monologue_budget_secs == 0 {
        config.timing.monologue_budget_secs = DEFAULT_MONOLOGUE_BUDGET_SECS;
    }
    if config.scoring.providers.is_empty() {
        config.scoring.providers = ScoringConfig::default().providers;
    }
}

fn reveal(obfuscated: &Option<String>) -> Option<String> {
    obfuscated
        .as_deref()
        .and_then(deobfuscate_secret)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn obfuscate_secret(secret: &str) -> String {
    let mut bytes = secret.as_bytes().to_vec();
    for (idx, byte) in bytes.iter_mut().enumerate() {
        *byte ^= SECRET_XOR_KEY[idx % SECRET_XOR_KEY.len()];
    }
    BASE64_STANDARD.encode(bytes)
}

fn deobfuscate_secret(obfuscated: &str) -> Option<String> {
    let mut bytes = BASE64_STANDARD.decode(obfuscated).ok()?;
    for (idx, byte) in bytes.iter_mut().enumerate() {
        *byte ^= SECRET_XOR_KEY[idx % SECRET_XOR_KEY.len()];
    }
    String::from_utf8(bytes).ok()
}

pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 10 || !secret.is_ascii() {
        return "******".to_string();
    }

    let prefix = &secret[..6];
    let suffix = &secret[secret.len().saturating_sub(4)..];
    format!("{}********{}", prefix, suffix)
}

fn normalize_device_name(name: Option<String>) -> Option<String> {
    name.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
