use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

/// The result type used by the step monitor.
pub type Result<T> = std::result::Result<T, MonitorErr>;

/// Boxed error returned by sample generators.
pub type GenerateErr = Box<dyn Error + Send + Sync + 'static>;

/// Failures that abort a step.
///
/// Every variant keeps the collaborator's own error as its `source` and reuses its message, so
/// the loop driver sees the native failure.
#[derive(Debug)]
pub enum MonitorErr {
    Checkpoint {
        dir: PathBuf,
        source: io::Error,
    },
    SampleIo {
        path: PathBuf,
        source: io::Error,
    },
    Generate {
        index: usize,
        source: GenerateErr,
    },
    EmptyGeneration {
        index: usize,
    },
}

impl Display for MonitorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorErr::Checkpoint { source, .. } => write!(f, "{source}"),
            MonitorErr::SampleIo { source, .. } => write!(f, "{source}"),
            MonitorErr::Generate { source, .. } => write!(f, "{source}"),
            MonitorErr::EmptyGeneration { index } => {
                write!(f, "the generator returned no images for sample {index}")
            }
        }
    }
}

impl Error for MonitorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MonitorErr::Checkpoint { source, .. } => Some(source),
            MonitorErr::SampleIo { source, .. } => Some(source),
            MonitorErr::Generate { source, .. } => Some(source.as_ref()),
            MonitorErr::EmptyGeneration { .. } => None,
        }
    }
}

/// Configuration parsing failures.
#[derive(Debug)]
pub enum ConfigErr {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    Json(serde_json::Error),
    NotAMapping,
    NotPositive {
        key: &'static str,
    },
    WrongType {
        key: &'static str,
        expected: &'static str,
    },
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::Io { path, source } => {
                write!(f, "cannot read config '{}': {source}", path.display())
            }
            ConfigErr::Json(e) => write!(f, "invalid JSON config: {e}"),
            ConfigErr::NotAMapping => write!(f, "the training config must be a JSON object"),
            ConfigErr::NotPositive { key } => write!(f, "{key} must be a positive integer"),
            ConfigErr::WrongType { key, expected } => write!(f, "{key} must be {expected}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigErr::Io { source, .. } => Some(source),
            ConfigErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_error_keeps_native_message_and_source() {
        let err = MonitorErr::Checkpoint {
            dir: PathBuf::from("out/run/ckpt/10"),
            source: io::Error::new(io::ErrorKind::StorageFull, "disk full"),
        };

        assert_eq!(err.to_string(), "disk full");
        let source = err.source().unwrap();
        let io_err = source.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::StorageFull);
    }

    #[test]
    fn config_error_names_key() {
        let err = ConfigErr::NotPositive {
            key: "save_interval",
        };
        assert_eq!(err.to_string(), "save_interval must be a positive integer");
    }
}
