//! Loader configuration (kiln.toml)
//!
//! Every field has a default, so an empty document is a valid config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level loader configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderConfig {
    /// Cache directory owned by one resolver
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Subdirectory for intermediate archives and temporary artifacts
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,

    /// Subdirectory handed to loaded units as their native library path
    #[serde(default = "default_libs_dir")]
    pub libs_dir: String,

    /// Extension of intermediate archives
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,

    /// Extension of compiled artifacts (none by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_extension: Option<String>,

    /// Log a base64 dump of the input when the compiler yields nothing
    #[serde(default = "default_true")]
    pub dump_failed_input: bool,

    /// Bounded wait used before destructive cache operations
    #[serde(default)]
    pub quiescence: QuiescenceConfig,

    /// External compiler; the passthrough compiler is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerConfig>,
}

/// Polling parameters for `await_quiescent`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuiescenceConfig {
    /// Sleep between membership checks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of sleeps before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// External native compiler invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilerConfig {
    /// Program to run
    pub program: PathBuf,

    /// Argument templates; `{input}` and `{output}` are substituted
    #[serde(default = "default_compiler_args")]
    pub args: Vec<String>,

    /// Flag placed before the arguments when packaged output is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaged_flag: Option<String>,
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("kiln-cache")
}

fn default_staging_dir() -> String {
    "staging".to_string()
}

fn default_libs_dir() -> String {
    "libs".to_string()
}

fn default_archive_extension() -> String {
    "zip".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    50
}

fn default_compiler_args() -> Vec<String> {
    vec![
        "--output={output}".to_string(),
        "{input}".to_string(),
    ]
}

impl Default for QuiescenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl QuiescenceConfig {
    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on the time `await_quiescent` may sleep
    pub fn budget(&self) -> Duration {
        self.poll_interval() * self.max_attempts
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            staging_dir: default_staging_dir(),
            libs_dir: default_libs_dir(),
            archive_extension: default_archive_extension(),
            artifact_extension: None,
            dump_failed_input: true,
            quiescence: QuiescenceConfig::default(),
            compiler: None,
        }
    }
}

impl LoaderConfig {
    /// Default config rooted at `cache_dir`
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Load and validate a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LoaderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values serde accepts but the loader cannot use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quiescence.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "quiescence.poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        for (field, value) in [("staging_dir", &self.staging_dir), ("libs_dir", &self.libs_dir)] {
            if value.is_empty() || value.contains(['/', '\\']) || value == "." || value == ".." {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a single directory name, got {:?}",
                    field, value
                )));
            }
        }

        if self.staging_dir == self.libs_dir {
            return Err(ConfigError::Invalid(
                "staging_dir and libs_dir must differ".to_string(),
            ));
        }

        if let Some(compiler) = &self.compiler {
            if compiler.program.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("compiler.program is empty".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = LoaderConfig::from_toml_str("").unwrap();
        assert_eq!(config.staging_dir, "staging");
        assert_eq!(config.libs_dir, "libs");
        assert_eq!(config.archive_extension, "zip");
        assert!(config.dump_failed_input);
        assert_eq!(config.quiescence.poll_interval_ms, 100);
        assert_eq!(config.quiescence.max_attempts, 50);
        assert!(config.compiler.is_none());
    }

    #[test]
    fn test_parse_full_document() {
        let toml = r#"
            cache_dir = "/var/cache/kiln"
            artifact_extension = "so"
            dump_failed_input = false

            [quiescence]
            poll_interval_ms = 20
            max_attempts = 5

            [compiler]
            program = "/usr/bin/dx"
            args = ["--output={output}", "{input}"]
            packaged_flag = "--jar-output"
        "#;

        let config = LoaderConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/kiln"));
        assert_eq!(config.artifact_extension.as_deref(), Some("so"));
        assert!(!config.dump_failed_input);
        assert_eq!(config.quiescence.budget(), Duration::from_millis(100));

        let compiler = config.compiler.unwrap();
        assert_eq!(compiler.program, PathBuf::from("/usr/bin/dx"));
        assert_eq!(compiler.packaged_flag.as_deref(), Some("--jar-output"));
    }

    #[test]
    fn test_default_budget_is_five_seconds() {
        assert_eq!(QuiescenceConfig::default().budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let err = LoaderConfig::from_toml_str("[quiescence]\npoll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_nested_subdirectory() {
        let err = LoaderConfig::from_toml_str("staging_dir = \"a/b\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_shared_subdirectory() {
        let err = LoaderConfig::from_toml_str("staging_dir = \"x\"\nlibs_dir = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_toml() {
        let err = LoaderConfig::from_toml_str("cache_dir = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
