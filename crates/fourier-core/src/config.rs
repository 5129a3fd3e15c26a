//! Engine configuration.
//!
//! An [`EngineConfig`] value is built once (defaults, optionally overlaid with
//! `FOURIER_*` environment variables) and handed to the orchestrator at
//! construction. There is no process-wide settings object.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{FourierError, Result};

/// How the translation stage expresses the reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationMode {
    /// The model writes both `original_function` and `fourier_reconstruction` sources.
    #[default]
    Functions,
    /// The model writes `original_function` and numeric `a0`/`an`/`bn`.
    Coefficients,
}

impl FromStr for TranslationMode {
    type Err = FourierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "functions" | "function" => Ok(Self::Functions),
            "coefficients" | "coefficient" => Ok(Self::Coefficients),
            other => Err(FourierError::InvalidConfig(format!(
                "unknown translation mode: {other}"
            ))),
        }
    }
}

/// Configuration for one orchestrator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard ceiling on loop passes per run.
    pub max_iterations: u32,
    /// Verification passes when max relative error is strictly below this.
    pub error_threshold: f64,
    /// `|original| <= zero_threshold` switches relative error to absolute error.
    pub zero_threshold: f64,
    /// Number of periods covered by the sample points.
    pub test_periods: u32,
    /// Total number of sample points across all covered periods.
    pub test_points: usize,
    /// Upper bound on the requested term count.
    pub max_terms: u32,
    pub translation_mode: TranslationMode,
    /// Model identity for the streamed derivation.
    pub derivation_model: String,
    /// Model identity for code translation and error analysis.
    pub analysis_model: String,
    /// Model identity for last-resort JSON repair. `None` disables repair.
    pub repair_model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            error_threshold: 0.05,
            zero_threshold: 1e-6,
            test_periods: 2,
            test_points: 500,
            max_terms: 20,
            translation_mode: TranslationMode::Functions,
            derivation_model: "claude-3-5-haiku-20241022".to_string(),
            analysis_model: "claude-3-5-haiku-20241022".to_string(),
            repair_model: Some("claude-3-5-haiku-20241022".to_string()),
            max_tokens: 8192,
            temperature: 0.0,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with any `FOURIER_*` variables present in the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("FOURIER_MAX_ITERATIONS") {
            config.max_iterations = parse_var("FOURIER_MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("FOURIER_ERROR_THRESHOLD") {
            config.error_threshold = parse_var("FOURIER_ERROR_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FOURIER_ZERO_THRESHOLD") {
            config.zero_threshold = parse_var("FOURIER_ZERO_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FOURIER_TEST_PERIODS") {
            config.test_periods = parse_var("FOURIER_TEST_PERIODS", &v)?;
        }
        if let Some(v) = lookup("FOURIER_TEST_POINTS") {
            config.test_points = parse_var("FOURIER_TEST_POINTS", &v)?;
        }
        if let Some(v) = lookup("FOURIER_MAX_TERMS") {
            config.max_terms = parse_var("FOURIER_MAX_TERMS", &v)?;
        }
        if let Some(v) = lookup("FOURIER_TRANSLATION_MODE") {
            config.translation_mode = v.parse()?;
        }
        if let Some(v) = lookup("FOURIER_DERIVATION_MODEL") {
            config.derivation_model = v;
        }
        if let Some(v) = lookup("FOURIER_ANALYSIS_MODEL") {
            config.analysis_model = v;
        }
        if let Some(v) = lookup("FOURIER_REPAIR_MODEL") {
            config.repair_model = if v.is_empty() || v == "none" {
                None
            } else {
                Some(v)
            };
        }
        if let Some(v) = lookup("FOURIER_MAX_TOKENS") {
            config.max_tokens = parse_var("FOURIER_MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("FOURIER_TEMPERATURE") {
            config.temperature = parse_var("FOURIER_TEMPERATURE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(FourierError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.error_threshold.is_finite() && self.error_threshold > 0.0) {
            return Err(FourierError::InvalidConfig(format!(
                "error_threshold must be positive, got {}",
                self.error_threshold
            )));
        }
        if !(self.zero_threshold.is_finite() && self.zero_threshold >= 0.0) {
            return Err(FourierError::InvalidConfig(format!(
                "zero_threshold must be non-negative, got {}",
                self.zero_threshold
            )));
        }
        if self.test_periods == 0 || self.test_points < 2 {
            return Err(FourierError::InvalidConfig(
                "sampling needs at least one period and two points".to_string(),
            ));
        }
        if self.max_terms == 0 {
            return Err(FourierError::InvalidConfig(
                "max_terms must be at least 1".to_string(),
            ));
        }
        if self.derivation_model.is_empty() || self.analysis_model.is_empty() {
            return Err(FourierError::InvalidConfig(
                "model identities must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the Anthropic Messages API.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl AnthropicConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            api_version: Self::DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Read `ANTHROPIC_API_KEY` (or `CLAUDE_API_KEY`), `ANTHROPIC_BASE_URL` and
    /// `ANTHROPIC_API_VERSION`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("ANTHROPIC_API_KEY")
            .or_else(|| lookup("CLAUDE_API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                FourierError::InvalidConfig(
                    "ANTHROPIC_API_KEY (or CLAUDE_API_KEY) is not set".to_string(),
                )
            })?;
        let mut config = Self::new(api_key.trim());
        if let Some(url) = lookup("ANTHROPIC_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(version) = lookup("ANTHROPIC_API_VERSION") {
            config.api_version = version;
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FourierError::InvalidConfig(format!("{key}: cannot parse '{value}'")))
}
