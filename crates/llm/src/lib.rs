mod error;
mod model;
mod rig_adapter;

pub use error::{TransportError, TransportResult};
pub use model::{
    DEFAULT_ANTHROPIC_MAX_TOKENS, DEFAULT_ANTHROPIC_MODEL, DEFAULT_OPENAI_MODEL, api_key_env_var,
    default_model_configs,
};
pub use rig_adapter::{RigTransport, event_channel};
