use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://api.euron.one/api/v1/euri";
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Clone, PartialEq)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ModelConfig {
    /// Fails fast when no usable credential is given.
    pub fn new(api_key: Option<String>) -> Result<Self, ConfigError> {
        let api_key = api_key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(std::env::var("EURI_API_KEY").ok())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {temperature} is outside 0.0..=2.0"
            )));
        }
        self.temperature = temperature;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_key_fails_fast() {
        assert_eq!(ModelConfig::new(None), Err(ConfigError::MissingApiKey));
        assert_eq!(
            ModelConfig::new(Some("   ".to_string())),
            Err(ConfigError::MissingApiKey)
        );
    }

    #[test]
    fn defaults_match_hosted_model() {
        let config = ModelConfig::new(Some(" key ".to_string())).unwrap();
        assert_eq!(config.api_key, "key");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn temperature_is_bounded() {
        let config = ModelConfig::new(Some("key".to_string())).unwrap();
        assert!(config.clone().with_temperature(3.5).is_err());
        assert_eq!(config.with_temperature(0.2).unwrap().temperature, 0.2);
    }

    #[test]
    fn debug_output_hides_the_key() {
        let config = ModelConfig::new(Some("secret-key".to_string())).unwrap();
        assert!(!format!("{config:?}").contains("secret-key"));
    }
}
