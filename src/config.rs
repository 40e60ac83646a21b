use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::error::ConfigErr;

pub const DEFAULT_PRINT_EVERY_N_STEPS: usize = 10;
pub const DEFAULT_SAVE_INTERVAL: usize = 1000;
pub const DEFAULT_SAMPLE_INTERVAL: usize = 1000;
pub const DEFAULT_SAVE_PATH: &str = "./output";
pub const DEFAULT_SAMPLE_SIZE: usize = 512;
pub const DEFAULT_SAMPLE_SEED: u64 = 42;
pub const DEFAULT_API_KEY_ENV: &str = "WANDB_API_KEY";

/// Settings for the remote metrics backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WandbConfig {
    pub project: Option<String>,
    pub entity: Option<String>,
    /// Environment variable holding the backend credential.
    pub api_key_env: String,
}

impl Default for WandbConfig {
    fn default() -> Self {
        Self {
            project: None,
            entity: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

/// One qualitative sample rendered at every sample step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSpec {
    pub condition: PathBuf,
    pub context: PathBuf,
    pub prompt: String,
}

/// Immutable settings for a single training run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_name: String,
    pub print_every_n_steps: NonZeroUsize,
    pub save_interval: NonZeroUsize,
    pub sample_interval: NonZeroUsize,
    pub save_path: PathBuf,
    pub wandb: Option<WandbConfig>,
    pub samples: Vec<SampleSpec>,
    pub sample_height: NonZeroUsize,
    pub sample_width: NonZeroUsize,
    pub sample_seed: u64,
}

impl RunConfig {
    /// Returns a `RunConfig` with every option at its default.
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            print_every_n_steps: nonzero(DEFAULT_PRINT_EVERY_N_STEPS),
            save_interval: nonzero(DEFAULT_SAVE_INTERVAL),
            sample_interval: nonzero(DEFAULT_SAMPLE_INTERVAL),
            save_path: PathBuf::from(DEFAULT_SAVE_PATH),
            wandb: None,
            samples: Vec::new(),
            sample_height: nonzero(DEFAULT_SAMPLE_SIZE),
            sample_width: nonzero(DEFAULT_SAMPLE_SIZE),
            sample_seed: DEFAULT_SAMPLE_SEED,
        }
    }

    /// Builds a `RunConfig` from a training config mapping.
    ///
    /// Unrecognized keys are ignored and missing (or `null`) keys fall back to their defaults.
    ///
    /// # Errors
    /// Returns a `ConfigErr` if `val` is not an object or a recognized key has an invalid value.
    pub fn from_json(run_name: impl Into<String>, val: &Value) -> Result<Self, ConfigErr> {
        if !val.is_object() {
            return Err(ConfigErr::NotAMapping);
        }

        let mut config = Self::new(run_name);

        if let Some(n) = positive(val, "print_every_n_steps")? {
            config.print_every_n_steps = n;
        }
        if let Some(n) = positive(val, "save_interval")? {
            config.save_interval = n;
        }
        if let Some(n) = positive(val, "sample_interval")? {
            config.sample_interval = n;
        }
        if let Some(path) = string(val, "save_path")? {
            config.save_path = PathBuf::from(path);
        }
        if let Some(n) = positive(val, "sample_height")? {
            config.sample_height = n;
        }
        if let Some(n) = positive(val, "sample_width")? {
            config.sample_width = n;
        }
        if let Some(v) = field(val, "sample_seed") {
            config.sample_seed = v.as_u64().ok_or(ConfigErr::WrongType {
                key: "sample_seed",
                expected: "an unsigned integer",
            })?;
        }

        config.wandb = field(val, "wandb").map(parse_wandb).transpose()?;

        if let Some(samples) = field(val, "samples") {
            config.samples = samples
                .as_array()
                .ok_or(ConfigErr::WrongType {
                    key: "samples",
                    expected: "an array",
                })?
                .iter()
                .map(parse_sample)
                .collect::<Result<_, _>>()?;
        }

        Ok(config)
    }

    /// Loads a `RunConfig` from a JSON file.
    ///
    /// # Errors
    /// Returns a `ConfigErr` if the file cannot be read or parsed.
    pub fn from_file(
        run_name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, ConfigErr> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigErr::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let val: Value = serde_json::from_str(&content)?;
        Self::from_json(run_name, &val)
    }

    /// `{save_path}/{run_name}`
    pub fn run_dir(&self) -> PathBuf {
        self.save_path.join(&self.run_name)
    }

    /// Environment variable that gates the metrics backend.
    pub fn api_key_env(&self) -> &str {
        self.wandb
            .as_ref()
            .map(|w| w.api_key_env.as_str())
            .unwrap_or(DEFAULT_API_KEY_ENV)
    }
}

fn nonzero(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

fn field<'a>(val: &'a Value, key: &str) -> Option<&'a Value> {
    val.get(key).filter(|v| !v.is_null())
}

fn positive(val: &Value, key: &'static str) -> Result<Option<NonZeroUsize>, ConfigErr> {
    let Some(v) = field(val, key) else {
        return Ok(None);
    };

    if let Some(n) = v.as_u64() {
        return NonZeroUsize::new(n as usize)
            .map(Some)
            .ok_or(ConfigErr::NotPositive { key });
    }

    if v.as_i64().is_some() {
        return Err(ConfigErr::NotPositive { key });
    }

    Err(ConfigErr::WrongType {
        key,
        expected: "a positive integer",
    })
}

fn string(val: &Value, key: &'static str) -> Result<Option<String>, ConfigErr> {
    field(val, key)
        .map(|v| {
            v.as_str().map(str::to_string).ok_or(ConfigErr::WrongType {
                key,
                expected: "a string",
            })
        })
        .transpose()
}

fn parse_wandb(val: &Value) -> Result<WandbConfig, ConfigErr> {
    if !val.is_object() {
        return Err(ConfigErr::WrongType {
            key: "wandb",
            expected: "an object",
        });
    }

    Ok(WandbConfig {
        project: string(val, "project")?,
        entity: string(val, "entity")?,
        api_key_env: string(val, "api_key_env")?
            .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
    })
}

fn parse_sample(val: &Value) -> Result<SampleSpec, ConfigErr> {
    let required = |key: &'static str| -> Result<String, ConfigErr> {
        string(val, key)?.ok_or(ConfigErr::WrongType {
            key,
            expected: "a string",
        })
    };

    Ok(SampleSpec {
        condition: PathBuf::from(required("condition")?),
        context: PathBuf::from(required("context")?),
        prompt: required("prompt")?,
    })
}
