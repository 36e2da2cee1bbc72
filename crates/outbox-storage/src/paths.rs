use std::{env, path::PathBuf};

use outbox_core::OutboxError;

pub const APP_NAME: &str = "outbox";
pub const ENV_VAR: &str = "OUTBOX_ENV";
pub const PROFILE_VAR: &str = "OUTBOX_PROFILE";
pub const ROOT_VAR: &str = "OUTBOX_DIR";
pub const CONFIG_FILENAME: &str = "config.enc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
    Test,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Environment::Development),
            "prod" | "production" => Some(Environment::Production),
            "test" | "testing" => Some(Environment::Test),
            _ => None,
        }
    }

    fn dir_suffix(&self) -> Option<&'static str> {
        match self {
            Environment::Production => None,
            Environment::Development => Some("dev"),
            Environment::Test => Some("test"),
        }
    }
}

/// Inputs to path resolution. Everything else is platform-derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    pub app_name: String,
    pub environment: Environment,
    /// Isolates independent configurations (per client or mailbox).
    pub profile: String,
    /// Replaces every platform root; used by tests and portable installs.
    pub root_override: Option<PathBuf>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            environment: Environment::Production,
            profile: "default".to_string(),
            root_override: None,
        }
    }
}

impl RuntimeContext {
    /// Context from `OUTBOX_ENV`, `OUTBOX_PROFILE` and `OUTBOX_DIR`.
    pub fn from_env() -> Self {
        let environment = env::var(ENV_VAR)
            .ok()
            .and_then(|v| Environment::parse(&v))
            .unwrap_or_default();
        let profile = env::var(PROFILE_VAR)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "default".to_string());
        let root_override = env::var(ROOT_VAR)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self {
            environment,
            profile,
            root_override,
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_override = Some(root.into());
        self
    }

    fn dir_name(&self) -> String {
        match self.environment.dir_suffix() {
            Some(suffix) => format!("{}-{suffix}", self.app_name),
            None => self.app_name.clone(),
        }
    }
}

/// Resolved directories for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub profile: String,
}

impl AppPaths {
    pub fn resolve(ctx: &RuntimeContext) -> Result<Self, OutboxError> {
        validate_profile(&ctx.profile)?;
        let name = ctx.dir_name();

        if let Some(root) = &ctx.root_override {
            return Ok(Self {
                config_dir: root.join("config"),
                state_dir: root.join("state"),
                data_dir: root.join("data"),
                profile: ctx.profile.clone(),
            });
        }

        let config = dirs::config_dir().ok_or_else(|| OutboxError::storage("no config dir available"))?;
        let data = dirs::data_dir().ok_or_else(|| OutboxError::storage("no data dir available"))?;
        // Only Linux has a separate state directory.
        let state = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| data.clone());

        Ok(Self {
            config_dir: config.join(&name),
            state_dir: state.join(&name),
            data_dir: data.join(&name),
            profile: ctx.profile.clone(),
        })
    }

    pub fn encrypted_config_path(&self) -> PathBuf {
        self.config_dir
            .join("profiles")
            .join(&self.profile)
            .join(CONFIG_FILENAME)
    }

    pub fn dry_run_dir(&self) -> PathBuf {
        self.data_dir.join("dry_run")
    }
}

fn validate_profile(profile: &str) -> Result<(), OutboxError> {
    let valid = !profile.is_empty()
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(OutboxError::InvalidProfile(profile.to_string()))
    }
}
