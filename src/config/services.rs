use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Load balancing policy of a service pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingType {
    #[default]
    RoundRobin,
    WeightedRandom,
    LeastConnections,
}

impl LoadBalancingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancingType::RoundRobin => "round_robin",
            LoadBalancingType::WeightedRandom => "weighted_random",
            LoadBalancingType::LeastConnections => "least_connections",
        }
    }
}

/// A named service reachable through `lb://<name>`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub load_balancing: LoadBalancingType,
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_weight() -> u32 {
    1
}

fn default_scheme() -> String {
    "http".to_string()
}

impl InstanceConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ServiceConfig {
    pub fn validate(&self, name: &str) -> GatewayResult<()> {
        if self.instances.is_empty() {
            return Err(GatewayError::config(format!(
                "Service '{}' has no instances",
                name
            )));
        }
        for instance in &self.instances {
            if instance.host.is_empty() || instance.port == 0 {
                return Err(GatewayError::config(format!(
                    "Service '{}' has an invalid instance '{}'",
                    name,
                    instance.address()
                )));
            }
            if instance.scheme != "http" && instance.scheme != "https" {
                return Err(GatewayError::config(format!(
                    "Service '{}' instance '{}' has unsupported scheme '{}'",
                    name,
                    instance.address(),
                    instance.scheme
                )));
            }
        }
        Ok(())
    }
}

/// Credential verifiers available to auth filters by name
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerifierConfig {
    /// Fixed list of accepted tokens
    Static { tokens: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_deserialize_defaults() {
        let service: ServiceConfig = toml::from_str(
            r#"
instances = [{ host = "127.0.0.1", port = 8081 }]
"#,
        )
        .unwrap();

        assert_eq!(service.load_balancing, LoadBalancingType::RoundRobin);
        assert_eq!(service.instances[0].weight, 1);
        assert_eq!(service.instances[0].scheme, "http");
        assert!(service.validate("students").is_ok());
    }

    #[test]
    fn test_service_validation() {
        let empty = ServiceConfig {
            load_balancing: LoadBalancingType::LeastConnections,
            instances: Vec::new(),
        };
        assert!(empty.validate("grades").is_err());

        let bad_scheme = ServiceConfig {
            load_balancing: LoadBalancingType::WeightedRandom,
            instances: vec![InstanceConfig {
                host: "grades".to_string(),
                port: 8083,
                weight: 1,
                scheme: "ftp".to_string(),
            }],
        };
        assert!(bad_scheme.validate("grades").is_err());
    }

    #[test]
    fn test_verifier_config() {
        let verifier: VerifierConfig = toml::from_str(
            r#"
type = "static"
tokens = ["a", "b"]
"#,
        )
        .unwrap();
        let VerifierConfig::Static { tokens } = verifier;
        assert_eq!(tokens.len(), 2);
    }
}
