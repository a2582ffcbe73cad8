use std::fmt::Display;
use thiserror::Error;

const PLACEHOLDER: &str = "{}";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid key template {0:?}: expected exactly one {{}} placeholder")]
    InvalidKeyTemplate(String),
}

/// Turns a caller key into the physical storage key, e.g. `quiz:{}:detail`
/// with key `7` gives `quiz:7:detail`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    prefix: String,
    suffix: String,
}

impl KeyTemplate {
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        match template.split_once(PLACEHOLDER) {
            Some((prefix, suffix)) if !suffix.contains(PLACEHOLDER) => Ok(Self {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
            _ => Err(ConfigError::InvalidKeyTemplate(template.to_string())),
        }
    }

    pub fn format<K: Display + ?Sized>(&self, key: &K) -> String {
        format!("{}{}{}", self.prefix, key, self.suffix)
    }
}

impl Display for KeyTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{PLACEHOLDER}{}", self.prefix, self.suffix)
    }
}
