use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use deployd_core::ownership::FileOwner;
use deployd_supervisor::workdir::DEFAULT_WORKDIR;
use deployd_supervisor::{GroupSettings, ServiceSpec};

/// Environment selected when `ENV` is unset.
pub const DEFAULT_ENV: &str = "development";

pub const DEFAULT_MIGRATION_TOOL: &str = "alembic";
pub const DEFAULT_SERVE_CMD: &str = "uvicorn app.main:app --host 0.0.0.0 --port 8000";
pub const DEFAULT_WORKER_CMD: &str = "celery -A app.core.celery worker --loglevel=info";
pub const DEFAULT_SCHEDULER_CMD: &str = "celery -A app.core.celery beat --loglevel=info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment file {} not found (ENV={env})", .path.display())]
    EnvFileMissing { env: String, path: PathBuf },

    #[error("Failed to load environment file {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Required command {program:?} for {purpose} was not found on PATH")]
    CommandNotFound {
        program: String,
        purpose: &'static str,
    },
}

/// Whether the serving process waits for migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupOrder {
    /// Migrate, then launch serve, worker and scheduler.
    #[default]
    MigrateFirst,
    /// Launch serve while migrating; worker and scheduler follow success.
    Concurrent,
}

impl FromStr for StartupOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "migrate-first" | "migrate_first" => Ok(Self::MigrateFirst),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(format!("expected migrate-first or concurrent, got {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT` from the process environment; unset means text.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };
        Ok(env.parsed("LOG_FORMAT")?.unwrap_or_default())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected text or json, got {other}")),
        }
    }
}

/// Where the environment file lives and which one to load.
#[derive(Debug, Clone)]
pub struct EnvSelection {
    pub env: String,
    pub root: PathBuf,
}

impl EnvSelection {
    /// Read `ENV` and `CONFIG_ROOT` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            env: get("ENV").unwrap_or_else(|| DEFAULT_ENV.to_string()),
            root: get("CONFIG_ROOT").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// `<root>/secret/.env.<env>`.
    pub fn env_file(&self) -> PathBuf {
        self.root.join("secret").join(format!(".env.{}", self.env))
    }

    /// Load the selected file into the process environment, overriding
    /// variables that are already set.
    pub fn load(&self) -> Result<PathBuf, ConfigError> {
        let path = self.env_file();
        if !path.is_file() {
            return Err(ConfigError::EnvFileMissing {
                env: self.env.clone(),
                path,
            });
        }
        dotenvy::from_path_override(&path).map_err(|source| ConfigError::EnvFile {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Everything the orchestrator needs for one deployment run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory the migration tool runs in; relative paths resolve here.
    pub root: PathBuf,
    pub database_url: String,
    pub connect_timeout: Duration,
    pub migration_tool: String,
    pub migration_tool_args: Vec<String>,
    pub migrations_dir: PathBuf,
    pub migration_file_ext: String,
    pub migration_timeout: Duration,
    pub extra_fatal_signatures: Vec<String>,
    pub runtime_owner: FileOwner,
    pub serve: ServiceSpec,
    pub worker: ServiceSpec,
    pub scheduler: ServiceSpec,
    pub worker_workdir: PathBuf,
    pub startup_order: StartupOrder,
    pub group: GroupSettings,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `DATABASE_URL`                  | required                |
    /// | `DATABASE_CONNECT_TIMEOUT_SECS` | `10`                    |
    /// | `MIGRATION_TOOL`                | `alembic`               |
    /// | `MIGRATION_TOOL_ARGS`           | (none)                  |
    /// | `MIGRATIONS_DIR`                | `alembic/versions`      |
    /// | `MIGRATION_FILE_EXT`            | `py`                    |
    /// | `MIGRATION_TIMEOUT_SECS`        | `300`                   |
    /// | `FATAL_SIGNATURES_EXTRA`        | (none)                  |
    /// | `RUNTIME_UID` / `RUNTIME_GID`   | (unset)                 |
    /// | `SERVE_CMD`                     | uvicorn on port 8000    |
    /// | `WORKER_CMD`                    | celery worker           |
    /// | `SCHEDULER_CMD`                 | celery beat             |
    /// | `WORKER_WORKDIR`                | `/tmp/celery`           |
    /// | `STARTUP_ORDER`                 | `migrate-first`         |
    /// | `STARTUP_GRACE_SECS`            | `5`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                    |
    /// | `HEALTH_CHECK_INTERVAL_SECS`    | `30`                    |
    ///
    /// `LOG_FORMAT` is read separately by [`LogFormat::from_env`], before
    /// tracing is installed.
    pub fn from_env(root: &Path) -> Result<Self, ConfigError> {
        Self::from_lookup(root, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(root: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let database_url = env.get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let serve = env.service("serve", "SERVE_CMD", DEFAULT_SERVE_CMD)?;
        let worker = env
            .service("worker", "WORKER_CMD", DEFAULT_WORKER_CMD)?
            .in_shared_workdir();
        let scheduler = env
            .service("scheduler", "SCHEDULER_CMD", DEFAULT_SCHEDULER_CMD)?
            .in_shared_workdir();

        let migrations_dir = root.join(env.get_or("MIGRATIONS_DIR", deployd_migrate::layout::DEFAULT_MIGRATIONS_DIR));

        Ok(Self {
            root: root.to_path_buf(),
            database_url,
            connect_timeout: env.secs("DATABASE_CONNECT_TIMEOUT_SECS", deployd_db::DEFAULT_CONNECT_TIMEOUT)?,
            migration_tool: env.get_or("MIGRATION_TOOL", DEFAULT_MIGRATION_TOOL),
            migration_tool_args: env.words("MIGRATION_TOOL_ARGS")?,
            migrations_dir,
            migration_file_ext: env.get_or(
                "MIGRATION_FILE_EXT",
                deployd_migrate::layout::DEFAULT_MIGRATION_EXTENSION,
            ),
            migration_timeout: env.secs("MIGRATION_TIMEOUT_SECS", deployd_migrate::tool::DEFAULT_TOOL_TIMEOUT)?,
            extra_fatal_signatures: env
                .get("FATAL_SIGNATURES_EXTRA")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            runtime_owner: FileOwner::new(env.id("RUNTIME_UID")?, env.id("RUNTIME_GID")?),
            serve,
            worker,
            scheduler,
            worker_workdir: PathBuf::from(env.get_or("WORKER_WORKDIR", DEFAULT_WORKDIR)),
            startup_order: env.parsed("STARTUP_ORDER")?.unwrap_or_default(),
            group: GroupSettings {
                startup_grace: env.secs(
                    "STARTUP_GRACE_SECS",
                    deployd_supervisor::group::DEFAULT_STARTUP_GRACE,
                )?,
                shutdown_timeout: env.secs(
                    "SHUTDOWN_TIMEOUT_SECS",
                    deployd_supervisor::group::DEFAULT_SHUTDOWN_TIMEOUT,
                )?,
                health_check_interval: env.nonzero_secs(
                    "HEALTH_CHECK_INTERVAL_SECS",
                    deployd_supervisor::group::DEFAULT_HEALTH_CHECK_INTERVAL,
                )?,
            },
        })
    }

    /// Services in startup order.
    pub fn services(&self) -> [ServiceSpec; 3] {
        [self.serve.clone(), self.worker.clone(), self.scheduler.clone()]
    }

    /// Confirm every external program resolves before anything runs.
    pub fn verify_commands(&self) -> Result<(), ConfigError> {
        let required = [
            (self.migration_tool.as_str(), "migrations"),
            (self.serve.program.as_str(), "serve"),
            (self.worker.program.as_str(), "worker"),
            (self.scheduler.program.as_str(), "scheduler"),
        ];
        for (program, purpose) in required {
            match which::which(program) {
                Ok(path) => tracing::debug!(program, path = %path.display(), "Resolved command"),
                Err(_) => {
                    return Err(ConfigError::CommandNotFound {
                        program: program.to_string(),
                        purpose,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Typed accessors over a variable lookup. Blank values count as unset.
struct Env<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    value,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parsed::<u64>(key)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    }

    fn nonzero_secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.secs(key, default)?;
        if secs.is_zero() {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(secs)
    }

    fn id(&self, key: &'static str) -> Result<Option<u32>, ConfigError> {
        self.parsed::<u32>(key)
    }

    /// Shell-word split, empty when unset.
    fn words(&self, key: &'static str) -> Result<Vec<String>, ConfigError> {
        match self.get(key) {
            Some(raw) => split_words(key, &raw),
            None => Ok(Vec::new()),
        }
    }

    fn service(&self, name: &str, key: &'static str, default: &str) -> Result<ServiceSpec, ConfigError> {
        let raw = self.get_or(key, default);
        let argv = split_words(key, &raw)?;
        match ServiceSpec::from_argv(name, &argv) {
            Some(spec) if !spec.program.is_empty() => Ok(spec),
            _ => Err(ConfigError::Invalid {
                key,
                value: raw,
                reason: "empty command".to_string(),
            }),
        }
    }
}

fn split_words(key: &'static str, raw: &str) -> Result<Vec<String>, ConfigError> {
    shlex::split(raw).ok_or_else(|| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: "unbalanced quoting".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
