//! Pipeline configuration

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clinsynth_core::{MissingPolicy, PipelineError, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_COMPLETION_WINDOW: &str = "24h";
const DEFAULT_POLL_SECS: u64 = 30;
const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_WORK_DIR: &str = "pipeline_out";

/// Pipeline configuration, loaded once from the environment and command line
/// and passed by reference to every stage.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Overrides every stage's default sampling temperature when set.
    pub temperature: Option<f32>,
    pub poll_interval: Duration,
    pub completion_window: String,
    pub retry: RetryPolicy,
    /// Maximum realtime calls in flight while building items.
    pub concurrency: usize,
    pub missing_policy: MissingPolicy,
    pub work_dir: PathBuf,
    /// Reuse a submitted job and downloaded output found in the work dir.
    pub resume: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            completion_window: DEFAULT_COMPLETION_WINDOW.to_string(),
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            missing_policy: MissingPolicy::Strict,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            resume: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let retry_defaults = defaults.retry;

        let retry = RetryPolicy::new(
            parse_var(&lookup, "CLINSYNTH_RETRY_ATTEMPTS")?.unwrap_or(retry_defaults.max_attempts),
            parse_secs(&lookup, "CLINSYNTH_RETRY_MIN_SECS")?.unwrap_or(retry_defaults.min_wait),
            parse_secs(&lookup, "CLINSYNTH_RETRY_MAX_SECS")?.unwrap_or(retry_defaults.max_wait),
        );

        let concurrency: usize =
            parse_var(&lookup, "CLINSYNTH_CONCURRENCY")?.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(PipelineError::Config(
                "CLINSYNTH_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            api_key: lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
            base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: lookup("CLINSYNTH_MODEL").unwrap_or(defaults.model),
            temperature: parse_var(&lookup, "CLINSYNTH_TEMPERATURE")?,
            poll_interval: parse_var(&lookup, "CLINSYNTH_POLL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            completion_window: lookup("CLINSYNTH_COMPLETION_WINDOW")
                .unwrap_or(defaults.completion_window),
            retry,
            concurrency,
            missing_policy: parse_var(&lookup, "CLINSYNTH_MISSING_POLICY")?
                .unwrap_or(defaults.missing_policy),
            work_dir: lookup("CLINSYNTH_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            resume: false,
        })
    }

    /// Sampling parameters for a stage with the given default temperature.
    pub fn sampling(&self, default_temperature: f32) -> Sampling {
        Sampling {
            model: self.model.clone(),
            temperature: self.temperature.unwrap_or(default_temperature),
        }
    }

    /// Directory holding one stage's artifacts.
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.work_dir.join(stage)
    }

    /// The API key, or a configuration error naming the variable.
    pub fn require_api_key(&self) -> Result<&str, PipelineError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Config("OPENAI_API_KEY is not set".to_string()))
    }
}

/// Model and temperature for one stage's requests
#[derive(Debug, Clone, PartialEq)]
pub struct Sampling {
    pub model: String,
    pub temperature: f32,
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PipelineError::Config(format!("{key}='{raw}': {e}"))),
        None => Ok(None),
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, PipelineError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var::<f64, F>(lookup, key)?
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| PipelineError::Config(format!("{key}={secs}: {e}")))
        })
        .transpose()
}
