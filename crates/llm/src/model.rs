use quill_chat::{ModelConfig, ProviderKind};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";

/// Anthropic rejects requests without `max_tokens`, so one is always sent.
pub const DEFAULT_ANTHROPIC_MAX_TOKENS: u64 = 4096;

/// Environment variable consulted when a config leaves its API key blank.
pub fn api_key_env_var(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::OpenAi => "OPENAI_API_KEY",
        ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
    }
}

pub fn default_model_configs() -> Vec<ModelConfig> {
    vec![
        ModelConfig::new(DEFAULT_OPENAI_MODEL, ProviderKind::OpenAi),
        ModelConfig::new(DEFAULT_ANTHROPIC_MODEL, ProviderKind::Anthropic),
    ]
}
