//! Ecosystem document loading and directive validation.
//!
//! An ecosystem document is a TOML file with one `[[apps]]` table per managed
//! application:
//!
//! - [`EcosystemConfig`] - the raw document as parsed
//! - [`AppConfig`] - one raw `[[apps]]` entry, every field optional
//! - [`Directive`] - a validated, immutable entry ready to supervise
//!
//! Validation stops at the first invalid field and reports it by name.
//! Non-fatal findings are collected in a [`ValidationResult`].

use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::daemon::paths;
use crate::date_format::LogDateFormat;
use crate::error::{Error, Result};
use crate::reliability::RestartPolicy;
use crate::utils::{parse_duration, parse_size};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A size or duration written either as a number or a suffixed string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(i64),
    Text(String),
}

/// Root of an ecosystem document.
#[derive(Debug, Default, Deserialize)]
pub struct EcosystemConfig {
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

/// One `[[apps]]` entry exactly as written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub instances: Option<i64>,
    #[serde(default)]
    pub autorestart: Option<bool>,
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub ignore_watch: Vec<String>,
    #[serde(default)]
    pub max_memory_restart: Option<Quantity>,
    #[serde(default)]
    pub env: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub error_file: Option<String>,
    #[serde(default)]
    pub out_file: Option<String>,
    #[serde(default)]
    pub log_date_format: Option<String>,
    #[serde(default)]
    pub merge_logs: bool,
    #[serde(default)]
    pub post_update: Vec<String>,
    #[serde(default)]
    pub min_uptime: Option<Quantity>,
    #[serde(default)]
    pub max_restarts: Option<i64>,
    #[serde(default)]
    pub restart_delay: Option<i64>,
    #[serde(default)]
    pub kill_timeout: Option<i64>,
    #[serde(default)]
    pub stop_exit_codes: Vec<i32>,
}

/// A validated, immutable process directive.
#[derive(Debug, Clone, Serialize)]
pub struct Directive {
    pub name: String,
    pub script: PathBuf,
    pub interpreter: Option<PathBuf>,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub instances: u32,
    pub autorestart: bool,
    pub watch: bool,
    pub ignore_watch: Vec<PathBuf>,
    pub max_memory_restart: Option<u64>,
    pub env: BTreeMap<String, String>,
    pub error_file: PathBuf,
    pub out_file: PathBuf,
    pub log_date_format: Option<LogDateFormat>,
    pub merge_logs: bool,
    pub post_update: Vec<String>,
    #[serde(serialize_with = "serialize_millis")]
    pub min_uptime: Duration,
    pub max_restarts: u32,
    #[serde(serialize_with = "serialize_millis")]
    pub restart_delay: Duration,
    #[serde(serialize_with = "serialize_millis")]
    pub kill_timeout: Duration,
    pub stop_exit_codes: Vec<i32>,
}

/// Log destinations for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub out: PathBuf,
    pub error: PathBuf,
}

/// A fully loaded document.
#[derive(Debug)]
pub struct LoadedEcosystem {
    pub path: PathBuf,
    pub directives: Vec<Directive>,
    pub validation: ValidationResult,
}

fn serialize_millis<S: Serializer>(
    value: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

impl EcosystemConfig {
    /// Load an ecosystem document from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigRead`] if the file cannot be read and
    /// [`Error::ConfigParse`] if it is not valid TOML of the expected shape.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content, path)
    }

    /// Parse document text. `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] on malformed TOML.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Validate every app and return the directives in document order.
    ///
    /// `base_dir` anchors relative `cwd` values; `logs_dir` holds default log
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigLoad`] for the first invalid field, including
    /// duplicate names and an empty `apps` list.
    pub fn resolve(
        &self,
        base_dir: &Path,
        logs_dir: &Path,
    ) -> Result<(Vec<Directive>, ValidationResult)> {
        if self.apps.is_empty() {
            return Err(Error::config_load("apps", "document declares no apps"));
        }

        let mut validation = ValidationResult::default();
        let mut seen = HashSet::new();
        let mut directives = Vec::with_capacity(self.apps.len());

        for app in &self.apps {
            let directive = app.validate(base_dir, logs_dir, &mut validation)?;
            if !seen.insert(directive.name.clone()) {
                return Err(Error::config_load(
                    "name",
                    format!("duplicate app name '{}'", directive.name),
                ));
            }
            directives.push(directive);
        }

        Ok((directives, validation))
    }
}

/// Load and validate a document in one step.
///
/// Relative paths resolve against the document's directory and default logs
/// go under the keeper home directory.
///
/// # Errors
///
/// Propagates read, parse and validation errors.
pub fn load_directives<P: AsRef<Path>>(path: P) -> Result<LoadedEcosystem> {
    let path = path.as_ref();
    let config = EcosystemConfig::load_from(path)?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let base_dir = base_dir.canonicalize().unwrap_or(base_dir);
    let logs_dir = paths::get_logs_dir().unwrap_or_else(|_| base_dir.join("logs"));

    let (directives, validation) = config.resolve(&base_dir, &logs_dir)?;

    Ok(LoadedEcosystem {
        path: path.to_path_buf(),
        directives,
        validation,
    })
}

impl AppConfig {
    /// Validate this entry into a [`Directive`].
    ///
    /// Fields are checked in declaration order; the first failure wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigLoad`] naming the invalid field.
    pub fn validate(
        &self,
        base_dir: &Path,
        logs_dir: &Path,
        validation: &mut ValidationResult,
    ) -> Result<Directive> {
        let name = required_text("name", self.name.as_deref())?;
        if name.contains(['/', '\\']) {
            return Err(Error::config_load(
                "name",
                format!("'{name}' must not contain path separators"),
            ));
        }

        let script = required_text("script", self.script.as_deref())?;

        let interpreter = match self.interpreter.as_deref().map(str::trim) {
            Some("") => {
                return Err(Error::config_load(
                    "interpreter",
                    "cannot be empty (omit it to run the script directly)",
                ));
            },
            Some(path) => Some(PathBuf::from(path)),
            None => None,
        };

        let cwd = match self.cwd.as_deref().map(str::trim) {
            Some("") => return Err(Error::config_load("cwd", "cannot be empty")),
            Some(dir) => paths::resolve(base_dir, Path::new(dir)),
            None => base_dir.to_path_buf(),
        };

        let instances = match self.instances {
            None => constants::DEFAULT_INSTANCES,
            Some(n) if n >= 1 => u32::try_from(n)
                .map_err(|_| Error::config_load("instances", format!("{n} is too large")))?,
            Some(n) => {
                return Err(Error::config_load(
                    "instances",
                    format!("must be at least 1 (got {n})"),
                ));
            },
        };

        let max_memory_restart = match &self.max_memory_restart {
            None => None,
            Some(Quantity::Number(n)) if *n > 0 => Some(n.unsigned_abs()),
            Some(Quantity::Number(n)) => {
                return Err(Error::config_load(
                    "max_memory_restart",
                    format!("must be positive (got {n})"),
                ));
            },
            Some(Quantity::Text(text)) => match parse_size(text) {
                Ok(0) => {
                    return Err(Error::config_load("max_memory_restart", "must be positive"));
                },
                Ok(bytes) => Some(bytes),
                Err(reason) => return Err(Error::config_load("max_memory_restart", reason)),
            },
        };

        let mut env = BTreeMap::new();
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(Error::config_load(
                    "env",
                    format!("invalid variable name '{key}'"),
                ));
            }
            env.insert(key.clone(), env_value(key, value)?);
        }

        let error_file = log_path("error_file", self.error_file.as_deref(), &cwd)?
            .unwrap_or_else(|| paths::default_error_file(logs_dir, &name));
        let out_file = log_path("out_file", self.out_file.as_deref(), &cwd)?
            .unwrap_or_else(|| paths::default_out_file(logs_dir, &name));

        let log_date_format = match self.log_date_format.as_deref() {
            None => None,
            Some(pattern) => Some(
                LogDateFormat::parse(pattern)
                    .map_err(|reason| Error::config_load("log_date_format", reason))?,
            ),
        };

        for (index, hook) in self.post_update.iter().enumerate() {
            if hook.trim().is_empty() {
                return Err(Error::config_load(
                    "post_update",
                    format!("hook #{index} is empty"),
                ));
            }
        }

        let min_uptime = match &self.min_uptime {
            None => Duration::from_millis(constants::DEFAULT_MIN_UPTIME_MS),
            Some(Quantity::Number(ms)) if *ms >= 0 => Duration::from_millis(ms.unsigned_abs()),
            Some(Quantity::Number(ms)) => {
                return Err(Error::config_load(
                    "min_uptime",
                    format!("cannot be negative (got {ms})"),
                ));
            },
            Some(Quantity::Text(text)) => {
                parse_duration(text).map_err(|reason| Error::config_load("min_uptime", reason))?
            },
        };

        let max_restarts = non_negative(
            "max_restarts",
            self.max_restarts,
            i64::from(constants::DEFAULT_MAX_RESTARTS),
        )?;
        let max_restarts = u32::try_from(max_restarts)
            .map_err(|_| Error::config_load("max_restarts", "value is too large"))?;

        let restart_delay = Duration::from_millis(non_negative(
            "restart_delay",
            self.restart_delay,
            constants::DEFAULT_RESTART_DELAY_MS as i64,
        )?);
        let kill_timeout = Duration::from_millis(non_negative(
            "kill_timeout",
            self.kill_timeout,
            constants::DEFAULT_KILL_TIMEOUT_MS as i64,
        )?);

        let ignore_watch: Vec<PathBuf> = self
            .ignore_watch
            .iter()
            .map(|p| paths::resolve(&cwd, Path::new(p)))
            .collect();

        let directive = Directive {
            script: paths::resolve(&cwd, Path::new(&script)),
            name,
            interpreter,
            args: self.args.clone(),
            cwd,
            instances,
            autorestart: self.autorestart.unwrap_or(true),
            watch: self.watch,
            ignore_watch,
            max_memory_restart,
            env,
            error_file,
            out_file,
            log_date_format,
            merge_logs: self.merge_logs,
            post_update: self.post_update.clone(),
            min_uptime,
            max_restarts,
            restart_delay,
            kill_timeout,
            stop_exit_codes: self.stop_exit_codes.clone(),
        };

        directive.collect_warnings(validation);
        Ok(directive)
    }
}

impl Directive {
    /// Restart settings for this directive's instances.
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            autorestart: self.autorestart,
            max_restarts: self.max_restarts,
            min_uptime: self.min_uptime,
            restart_delay: self.restart_delay,
            stop_exit_codes: self.stop_exit_codes.clone(),
        }
    }

    /// Log files for `instance`.
    ///
    /// Instances share the configured files when `merge_logs` is set or there
    /// is only one instance; otherwise each instance gets `<stem>-<i>.<ext>`.
    pub fn log_paths(&self, instance: u32) -> LogPaths {
        if self.merge_logs || self.instances == 1 {
            LogPaths {
                out: self.out_file.clone(),
                error: self.error_file.clone(),
            }
        } else {
            LogPaths {
                out: paths::instance_log_path(&self.out_file, instance),
                error: paths::instance_log_path(&self.error_file, instance),
            }
        }
    }

    /// Program and arguments used to launch an instance.
    pub fn command_line(&self) -> (PathBuf, Vec<String>) {
        match &self.interpreter {
            Some(interpreter) => {
                let mut args = Vec::with_capacity(self.args.len() + 1);
                args.push(self.script.to_string_lossy().into_owned());
                args.extend(self.args.iter().cloned());
                (interpreter.clone(), args)
            },
            None => (self.script.clone(), self.args.clone()),
        }
    }

    fn collect_warnings(&self, validation: &mut ValidationResult) {
        if !self.script.exists() {
            validation.warnings.push(format!(
                "[{}] script {} does not exist yet (a post_update hook may create it)",
                self.name,
                self.script.display()
            ));
        }

        if let Some(interpreter) = &self.interpreter
            && interpreter.is_absolute()
            && !interpreter.exists()
        {
            validation.warnings.push(format!(
                "[{}] interpreter {} not found",
                self.name,
                interpreter.display()
            ));
        }

        if !self.autorestart && self.max_restarts != constants::DEFAULT_MAX_RESTARTS {
            validation.warnings.push(format!(
                "[{}] max_restarts has no effect while autorestart = false",
                self.name
            ));
        }

        if self.instances > 1 && !self.merge_logs {
            validation.warnings.push(format!(
                "[{}] {} instances without merge_logs write one log file per instance",
                self.name, self.instances
            ));
        }
    }
}

fn required_text(field: &str, value: Option<&str>) -> Result<String> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        Some(_) => Err(Error::config_load(field, "cannot be empty")),
        None => Err(Error::config_load(field, "is required")),
    }
}

fn non_negative(field: &str, value: Option<i64>, default: i64) -> Result<u64> {
    let value = value.unwrap_or(default);
    u64::try_from(value)
        .map_err(|_| Error::config_load(field, format!("cannot be negative (got {value})")))
}

fn log_path(field: &str, value: Option<&str>, cwd: &Path) -> Result<Option<PathBuf>> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("") => Err(Error::config_load(field, "cannot be empty")),
        Some(path) if path.ends_with('/') => Err(Error::config_load(
            field,
            format!("'{path}' names a directory, expected a file"),
        )),
        Some(path) => Ok(Some(paths::resolve(cwd, Path::new(path)))),
    }
}

fn env_value(key: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => Err(Error::config_load(
            "env",
            format!("value for '{key}' must be a scalar"),
        )),
    }
}
