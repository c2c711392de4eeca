//! Translator configuration.

use serde::{Deserialize, Serialize};
use xlate_core::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TranslatorConfig {
    /// Overrides the separator the store reports for joining key components.
    pub key_separator: Option<String>,
    /// Keep table-transformer results in a process-wide memo keyed by
    /// transformer name, operation and instance path.
    pub memoize_table_transformers: bool,
    /// Identity and enum values whose module prefix starts with one of these
    /// are stored without the prefix.
    pub strip_module_prefixes: Vec<String>,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            key_separator: None,
            memoize_table_transformers: false,
            strip_module_prefixes: vec![
                "openconfig-".to_string(),
                "ietf-".to_string(),
                "iana-".to_string(),
            ],
        }
    }
}

impl TranslatorConfig {
    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s)
            .map_err(|e| Error::internal(format!("invalid translator config: {}", e)))
    }

    /// Drop the module prefix from an identity or enum value when the
    /// module is one of the configured ones.
    ///
    /// ```rust
    /// use xlate_transformer::TranslatorConfig;
    ///
    /// let config = TranslatorConfig::default();
    /// assert_eq!(config.strip_value_prefix("openconfig-acl:ACL_IPV4"), "ACL_IPV4");
    /// assert_eq!(config.strip_value_prefix("vendor-x:FAST"), "vendor-x:FAST");
    /// ```
    pub fn strip_value_prefix<'v>(&self, value: &'v str) -> &'v str {
        match value.split_once(':') {
            Some((module, rest))
                if self
                    .strip_module_prefixes
                    .iter()
                    .any(|p| module.starts_with(p.as_str())) =>
            {
                rest
            }
            _ => value,
        }
    }
}
