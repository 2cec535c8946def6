use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{
    AmbiguousModelConfigSnafu, AssistantResult, MissingModelConfigSnafu,
};
use crate::session::{ResubmissionMessage, SessionId};

/// Wire family a model is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

/// Everything a transport needs to reach one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ModelConfig {
    pub fn new(model_name: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            model_name: model_name.into(),
            provider,
            api_key: String::new(),
            endpoint: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Provider configuration lookup.
pub trait ModelConfigSource {
    fn default_model_name(&self) -> String;
    fn model_configs(&self) -> Vec<ModelConfig>;
}

impl<T> ModelConfigSource for Arc<T>
where
    T: ModelConfigSource + ?Sized,
{
    fn default_model_name(&self) -> String {
        (**self).default_model_name()
    }

    fn model_configs(&self) -> Vec<ModelConfig> {
        (**self).model_configs()
    }
}

/// Outbound request: the session to answer and its full resubmission view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub session_id: SessionId,
    pub messages: Vec<ResubmissionMessage>,
}

/// Fire-and-forget request dispatch.
///
/// Implementations return as soon as the request is handed off; all streamed
/// content and any later failure arrive on the chunk-event channel.
pub trait PromptDispatcher {
    type Error: std::error::Error + Send + Sync + 'static;

    fn send_prompt(
        &self,
        model_name: &str,
        config: &ModelConfig,
        request: DispatchRequest,
    ) -> Result<(), Self::Error>;
}

impl<T> PromptDispatcher for Arc<T>
where
    T: PromptDispatcher + ?Sized,
{
    type Error = T::Error;

    fn send_prompt(
        &self,
        model_name: &str,
        config: &ModelConfig,
        request: DispatchRequest,
    ) -> Result<(), Self::Error> {
        (**self).send_prompt(model_name, config, request)
    }
}

/// Finds the single config matching the default model name.
pub fn resolve_model_config<S>(source: &S) -> AssistantResult<(String, ModelConfig)>
where
    S: ModelConfigSource + ?Sized,
{
    let model_name = source.default_model_name();
    let mut matches = source
        .model_configs()
        .into_iter()
        .filter(|config| config.model_name == model_name)
        .collect::<Vec<_>>();

    ensure!(
        matches.len() <= 1,
        AmbiguousModelConfigSnafu {
            stage: "resolve-model-config",
            model_name: model_name.clone(),
            matches: matches.len(),
        }
    );

    match matches.pop() {
        Some(config) => Ok((model_name, config)),
        None => MissingModelConfigSnafu {
            stage: "resolve-model-config",
            model_name,
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;

    struct StaticConfigs {
        default: &'static str,
        configs: Vec<ModelConfig>,
    }

    impl ModelConfigSource for StaticConfigs {
        fn default_model_name(&self) -> String {
            self.default.to_string()
        }

        fn model_configs(&self) -> Vec<ModelConfig> {
            self.configs.clone()
        }
    }

    #[test]
    fn resolves_the_config_named_by_default_model() {
        let source = StaticConfigs {
            default: "claude-sonnet-4-5",
            configs: vec![
                ModelConfig::new("gpt-4o-mini", ProviderKind::OpenAi),
                ModelConfig::new("claude-sonnet-4-5", ProviderKind::Anthropic),
            ],
        };

        let (model_name, config) = resolve_model_config(&source).expect("config resolves");

        assert_eq!(model_name, "claude-sonnet-4-5");
        assert_eq!(config.provider, ProviderKind::Anthropic);
    }

    #[test]
    fn missing_config_is_a_precondition_failure() {
        let source = StaticConfigs {
            default: "gpt-5",
            configs: vec![ModelConfig::new("gpt-4o-mini", ProviderKind::OpenAi)],
        };

        let error = resolve_model_config(&source).expect_err("no config matches");

        assert!(matches!(
            error,
            AssistantError::MissingModelConfig { ref model_name, .. } if model_name == "gpt-5"
        ));
    }

    #[test]
    fn duplicate_configs_are_rejected() {
        let source = Arc::new(StaticConfigs {
            default: "gpt-4o",
            configs: vec![
                ModelConfig::new("gpt-4o", ProviderKind::OpenAi),
                ModelConfig::new("gpt-4o", ProviderKind::OpenAi).with_endpoint("http://proxy"),
            ],
        });

        let error = resolve_model_config(&source).expect_err("two configs match");

        assert!(matches!(
            error,
            AssistantError::AmbiguousModelConfig { matches: 2, .. }
        ));
    }

    #[test]
    fn provider_kind_uses_lowercase_names() {
        let config: ModelConfig = serde_json::from_str(
            r#"{"model_name":"claude-3-5-haiku-latest","provider":"anthropic","api_key":"k"}"#,
        )
        .expect("config decodes");

        assert_eq!(config.provider, ProviderKind::Anthropic);
        assert_eq!(config.endpoint, None);
        assert_eq!(ProviderKind::default().as_str(), "openai");
    }
}
