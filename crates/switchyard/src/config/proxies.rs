//! Rewriting proxy profile configuration.

use crate::predicate::Predicate;
use crate::rewrite::{RequestOverrides, RequestRewriterConfig, ResponseRewriterConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub name: String,
    /// Predicates that must all hold for the profile to engage
    #[serde(default)]
    pub filter: Vec<Predicate>,
    #[serde(default)]
    pub overrides: RequestOverrides,
    /// Copy only inbound headers carrying this prefix, with the prefix stripped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_header_prefix: Option<String>,
    /// `- set_header: { name, value }`; unit rewriters are bare names (`- lowercase`)
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub request_rewriters: Vec<RequestRewriterConfig>,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub response_rewriters: Vec<ResponseRewriterConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
name: reddit
request_rewriters:
  - set_header: { name: x-via, value: switchyard }
  - rewrite_path: { pattern: "^/reddit", replacement: /r }
response_rewriters:
  - replace:
      pattern: Hello
      replacement: Goodbye
      content_types: [text/html]
  - lowercase
  - xpath_text: { xpath: //title, value: Switchyard }
"#;

    #[test]
    fn test_rewriters_use_single_key_maps() {
        let config: ProxyConfig = serde_yaml::from_str(PROFILE).unwrap();
        assert_eq!(
            config.request_rewriters[0],
            RequestRewriterConfig::SetHeader {
                name: "x-via".to_string(),
                value: "switchyard".to_string(),
            }
        );
        assert_eq!(config.request_rewriters.len(), 2);
        assert!(matches!(
            config.response_rewriters[0],
            ResponseRewriterConfig::Replace { ref content_types, .. } if content_types == &["text/html"]
        ));
        assert_eq!(config.response_rewriters[1], ResponseRewriterConfig::Lowercase);
        assert_eq!(config.response_rewriters.len(), 3);
    }

    #[test]
    fn test_rewriters_serialize_back_to_the_same_shape() {
        let config: ProxyConfig = serde_yaml::from_str(PROFILE).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("- lowercase"), "got {yaml}");
        assert!(yaml.contains("set_header:"), "got {yaml}");
        let reparsed: ProxyConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reparsed.response_rewriters, config.response_rewriters);
    }
}
