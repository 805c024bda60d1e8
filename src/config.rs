use bevy::prelude::*;

/// env var naming the answering service base url.
/// read at startup on native, at compile time on wasm.
pub const API_URL_ENV: &str = "ASKBOT_API_URL";

/// used when `ASKBOT_API_URL` is unset or blank.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// where the client sends questions.
#[derive(Resource, Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_API_URL.to_string() }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }

    pub fn from_env() -> Self {
        #[cfg(not(target_arch = "wasm32"))]
        let configured = std::env::var(API_URL_ENV).ok();
        #[cfg(target_arch = "wasm32")]
        let configured = option_env!("ASKBOT_API_URL").map(str::to_string);

        let config = Self::from_value(configured.as_deref());
        info!(target: "bevy_askbot", "ClientConfig: base_url='{}'", config.base_url);
        config
    }

    fn from_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self::new(v),
            _ => Self::default(),
        }
    }

    /// `{base}/chat`, tolerating a trailing slash on the base.
    pub fn chat_url(&self) -> String {
        format!("{}/chat", self.base_url.trim_end_matches('/'))
    }
}
