//! Gateway configuration: `config.yaml` plus `RANTS_*` environment
//! overrides of the form `RANTS_<SECTION>__<KEY>[__<INDEX>__<SUBKEY>]`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

pub const ENV_PREFIX: &str = "RANTS_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_tool_iterations: u32,
    pub max_wallclock_seconds: u64,
    pub workspace_root: PathBuf,
    pub tool_output_max_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 6,
            max_wallclock_seconds: 120,
            workspace_root: PathBuf::from("/work"),
            tool_output_max_bytes: 16_384,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualModelConfig {
    pub name: String,
    pub max_iterations: u32,
    pub max_depth: u32,
}

impl Default for VirtualModelConfig {
    fn default() -> Self {
        Self {
            name: "rants_one".to_string(),
            max_iterations: 10,
            max_depth: 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlmConfig {
    pub rants_one: VirtualModelConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEndpointConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

fn default_provider() -> String {
    "openai".to_string()
}

impl ModelEndpointConfig {
    pub fn temperature(&self) -> Option<f32> {
        self.parameters
            .get("temperature")
            .and_then(serde_json::Value::as_f64)
            .map(|value| value as f32)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub generator: ModelEndpointConfig,
    pub tool_compiler: ModelEndpointConfig,
    #[serde(default)]
    pub vision: Option<ModelEndpointConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub sqlite_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("/work/rants.sqlite"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub tenant_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_keys: Vec<ApiKeyEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 60,
            burst: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub request_timeout_seconds: f64,
    pub max_retries: u32,
    pub backoff_seconds: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 120.0,
            max_retries: 0,
            backoff_seconds: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub rlm: RlmConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

impl GatewayConfig {
    /// Load `config.yaml` (a missing file yields an empty mapping, so the
    /// models section must then come from the environment) and apply
    /// `RANTS_*` overrides from the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(error) => {
                return Err(GatewayError::internal(format!(
                    "failed to read config {}: {error}",
                    path.display()
                )))
            }
        };
        let overrides: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        Self::from_yaml(&raw, &overrides)
    }

    pub fn from_yaml(raw: &str, env: &[(String, String)]) -> Result<Self, GatewayError> {
        let mut value: serde_yaml::Value = if raw.trim().is_empty() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            serde_yaml::from_str(raw)
                .map_err(|error| GatewayError::internal(format!("invalid config yaml: {error}")))?
        };

        for (key, raw_value) in env {
            let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let segments: Vec<String> = stripped
                .split("__")
                .map(|segment| segment.to_ascii_lowercase())
                .collect();
            if segments.iter().any(String::is_empty) {
                continue;
            }
            apply_override(&mut value, &segments, raw_value);
        }

        serde_yaml::from_value(value)
            .map_err(|error| GatewayError::internal(format!("invalid config: {error}")))
    }
}

/// Walk (and create) the path through the YAML tree, then write the value.
/// Numeric segments index into sequences, growing them with empty mappings
/// as needed; scalar values are re-parsed so `"8001"` becomes a number.
fn apply_override(value: &mut serde_yaml::Value, path: &[String], raw: &str) {
    let Some((head, rest)) = path.split_first() else {
        *value = parse_scalar(raw);
        return;
    };

    if let Ok(index) = head.parse::<usize>() {
        if !value.is_sequence() {
            *value = serde_yaml::Value::Sequence(Vec::new());
        }
        let sequence = value.as_sequence_mut().expect("sequence just ensured");
        while sequence.len() <= index {
            sequence.push(serde_yaml::Value::Mapping(Default::default()));
        }
        apply_override(&mut sequence[index], rest, raw);
        return;
    }

    if !value.is_mapping() {
        *value = serde_yaml::Value::Mapping(Default::default());
    }
    let mapping = value.as_mapping_mut().expect("mapping just ensured");
    let key = serde_yaml::Value::String(head.clone());
    let entry = mapping
        .entry(key)
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    apply_override(entry, rest, raw);
}

fn parse_scalar(raw: &str) -> serde_yaml::Value {
    serde_yaml::from_str(raw).unwrap_or_else(|_| serde_yaml::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
models:
  generator:
    base_url: http://localhost:9001/v1
    model: gen-model
  tool_compiler:
    base_url: http://localhost:9002/v1
    model: compiler-model
    parameters:
      temperature: 0.0
"#;

    #[test]
    fn defaults_fill_every_optional_section() {
        let config = GatewayConfig::from_yaml(MINIMAL, &[]).expect("minimal config should parse");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.limits.max_tool_iterations, 6);
        assert_eq!(config.limits.max_wallclock_seconds, 120);
        assert_eq!(config.rlm.rants_one.name, "rants_one");
        assert_eq!(config.rlm.rants_one.max_depth, 2);
        assert!(!config.auth.enabled);
        assert!(!config.rate_limits.enabled);
        assert_eq!(config.resilience.max_retries, 0);
        assert_eq!(config.models.tool_compiler.temperature(), Some(0.0));
        assert!(config.models.vision.is_none());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env = vec![
            ("RANTS_SERVER__PORT".to_string(), "8443".to_string()),
            (
                "RANTS_LIMITS__MAX_TOOL_ITERATIONS".to_string(),
                "3".to_string(),
            ),
            (
                "RANTS_MODELS__GENERATOR__MODEL".to_string(),
                "override-model".to_string(),
            ),
        ];
        let config = GatewayConfig::from_yaml(MINIMAL, &env).expect("config should parse");
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.limits.max_tool_iterations, 3);
        assert_eq!(config.models.generator.model, "override-model");
    }

    #[test]
    fn env_overrides_reach_into_indexed_api_keys() {
        let env = vec![
            ("RANTS_AUTH__ENABLED".to_string(), "true".to_string()),
            (
                "RANTS_AUTH__API_KEYS__0__KEY".to_string(),
                "sk-test".to_string(),
            ),
            (
                "RANTS_AUTH__API_KEYS__0__TENANT_ID".to_string(),
                "tenant-a".to_string(),
            ),
        ];
        let config = GatewayConfig::from_yaml(MINIMAL, &env).expect("config should parse");
        assert!(config.auth.enabled);
        assert_eq!(config.auth.api_keys.len(), 1);
        assert_eq!(config.auth.api_keys[0].key, "sk-test");
        assert_eq!(config.auth.api_keys[0].tenant_id, "tenant-a");
    }

    #[test]
    fn missing_models_section_is_an_error() {
        assert!(GatewayConfig::from_yaml("", &[]).is_err());
    }
}
