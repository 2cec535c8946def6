use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use quill_chat::{ModelConfig, ModelConfigSource};
use quill_llm::{DEFAULT_OPENAI_MODEL, api_key_env_var, default_model_configs};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "quill";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "chats.sqlite3";
pub const ENV_PREFIX: &str = "QUILL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_model_name")]
    pub default_model: String,
    #[serde(default = "default_model_configs")]
    pub models: Vec<ModelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            default_model: default_model_name(),
            models: default_model_configs(),
            database_path: None,
        }
    }
}

impl LlmSettings {
    /// Trims names and keys, drops unnamed models and keeps the default pointing
    /// at something when it was left blank.
    ///
    /// Duplicate names are kept so lookup can report them.
    pub fn normalized(mut self) -> Self {
        self.models = self
            .models
            .into_iter()
            .filter_map(|mut config| {
                config.model_name = config.model_name.trim().to_string();
                config.api_key = config.api_key.trim().to_string();
                config.endpoint = config
                    .endpoint
                    .map(|endpoint| endpoint.trim().to_string())
                    .filter(|endpoint| !endpoint.is_empty());
                (!config.model_name.is_empty()).then_some(config)
            })
            .collect();
        if self.models.is_empty() {
            self.models = default_model_configs();
        }

        self.default_model = self.default_model.trim().to_string();
        if self.default_model.is_empty() {
            self.default_model = self
                .models
                .first()
                .map(|config| config.model_name.clone())
                .unwrap_or_else(default_model_name);
        }

        self
    }

    /// Model configs with blank API keys filled from `lookup`.
    pub fn resolved_models<F>(&self, lookup: F) -> Vec<ModelConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.models
            .iter()
            .cloned()
            .map(|mut config| {
                if config.api_key.is_empty()
                    && let Some(key) = lookup(api_key_env_var(config.provider))
                {
                    config.api_key = key.trim().to_string();
                }
                config
            })
            .collect()
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<LlmSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".quill"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".quill"))
            .join(DATABASE_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<LlmSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn database_path(&self) -> PathBuf {
        self.settings()
            .database_path
            .clone()
            .unwrap_or_else(Self::default_database_path)
    }

    pub fn update(&self, settings: LlmSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> LlmSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(LlmSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<LlmSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                LlmSettings::default()
            }
        }
    }

    fn persist(&self, settings: &LlmSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

impl ModelConfigSource for SettingsStore {
    fn default_model_name(&self) -> String {
        self.settings().default_model.clone()
    }

    fn model_configs(&self) -> Vec<ModelConfig> {
        self.settings()
            .resolved_models(|name| std::env::var(name).ok())
    }
}

/// Config source that swaps in a different default model name.
pub struct ModelOverride<S> {
    inner: S,
    model_name: Option<String>,
}

impl<S> ModelOverride<S> {
    pub fn new(inner: S, model_name: Option<String>) -> Self {
        let model_name = model_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        Self { inner, model_name }
    }
}

impl<S> ModelConfigSource for ModelOverride<S>
where
    S: ModelConfigSource,
{
    fn default_model_name(&self) -> String {
        match &self.model_name {
            Some(name) => name.clone(),
            None => self.inner.default_model_name(),
        }
    }

    fn model_configs(&self) -> Vec<ModelConfig> {
        self.inner.model_configs()
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_model_name() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}
