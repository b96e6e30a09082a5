use async_trait::async_trait;
use hyper::header::{HeaderName, AUTHORIZATION};
use hyper::{Body, Request};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::FilterResult;
use crate::config::{AuthScheme, VerifierConfig};
use crate::error::{GatewayError, GatewayResult};

const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Identity established by a verifier, stored in the request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub verifier: String,
}

/// Checks a credential extracted by an auth filter
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Return the principal, or `GatewayError::Unauthorized` for a bad credential
    async fn verify(&self, credential: &str) -> GatewayResult<Principal>;
}

/// Accepts a fixed set of tokens
pub struct StaticTokenVerifier {
    name: String,
    tokens: HashSet<String>,
}

impl StaticTokenVerifier {
    pub fn new<I, S>(name: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> GatewayResult<Principal> {
        if self.tokens.contains(credential) {
            Ok(Principal {
                subject: self.name.clone(),
                verifier: self.name.clone(),
            })
        } else {
            Err(GatewayError::unauthorized("invalid credential"))
        }
    }
}

/// Verifiers by name
///
/// Programmatically registered verifiers take precedence over the ones built
/// from configuration.
#[derive(Clone, Default)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn CredentialVerifier>>,
}

impl fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.verifiers.keys().collect();
        names.sort();
        f.debug_struct("VerifierRegistry")
            .field("verifiers", &names)
            .finish()
    }
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, verifier: Arc<dyn CredentialVerifier>) {
        self.verifiers.insert(name.into(), verifier);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CredentialVerifier>> {
        self.verifiers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.verifiers.contains_key(name)
    }

    /// Merge verifiers declared in configuration under the registered ones
    pub fn with_configured(&self, configured: &HashMap<String, VerifierConfig>) -> Self {
        let mut merged = self.clone();
        for (name, config) in configured {
            if merged.contains(name) {
                debug!(verifier = %name, "Configured verifier shadowed by registered one");
                continue;
            }
            let verifier: Arc<dyn CredentialVerifier> = match config {
                VerifierConfig::Static { tokens } => {
                    Arc::new(StaticTokenVerifier::new(name.clone(), tokens.iter().cloned()))
                }
            };
            merged.verifiers.insert(name.clone(), verifier);
        }
        merged
    }
}

/// Credential extraction and verification
pub struct AuthFilter {
    scheme: AuthScheme,
    header: HeaderName,
    verifier_name: String,
    verifier: Arc<dyn CredentialVerifier>,
}

impl fmt::Debug for AuthFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFilter")
            .field("scheme", &self.scheme)
            .field("header", &self.header)
            .field("verifier", &self.verifier_name)
            .finish()
    }
}

impl AuthFilter {
    pub fn new(
        scheme: AuthScheme,
        verifier_name: &str,
        header: Option<&str>,
        verifiers: &VerifierRegistry,
    ) -> GatewayResult<Self> {
        let verifier = verifiers.get(verifier_name).ok_or_else(|| {
            GatewayError::config(format!("Unknown credential verifier '{}'", verifier_name))
        })?;

        let header = match scheme {
            AuthScheme::Bearer => AUTHORIZATION,
            AuthScheme::ApiKey => {
                let name = header.unwrap_or(DEFAULT_API_KEY_HEADER);
                HeaderName::from_str(name).map_err(|e| {
                    GatewayError::config(format!("Invalid api key header '{}': {}", name, e))
                })?
            }
        };

        Ok(Self {
            scheme,
            header,
            verifier_name: verifier_name.to_string(),
            verifier,
        })
    }

    fn credential<'r>(&self, req: &'r Request<Body>) -> Option<&'r str> {
        let value = req.headers().get(&self.header)?.to_str().ok()?.trim();
        let credential = match self.scheme {
            AuthScheme::Bearer => {
                let (kind, token) = value.split_once(' ')?;
                if !kind.eq_ignore_ascii_case("bearer") {
                    return None;
                }
                token.trim()
            }
            AuthScheme::ApiKey => value,
        };
        (!credential.is_empty()).then_some(credential)
    }

    pub async fn on_request(&self, req: &mut Request<Body>) -> FilterResult {
        let Some(credential) = self.credential(req).map(str::to_string) else {
            return FilterResult::Reject(GatewayError::unauthorized("missing credential"));
        };

        match self.verifier.verify(&credential).await {
            Ok(principal) => {
                debug!(
                    subject = %principal.subject,
                    verifier = %self.verifier_name,
                    "Credential verified"
                );
                req.extensions_mut().insert(principal);
                FilterResult::Continue
            }
            Err(err @ GatewayError::Unauthorized { .. }) => FilterResult::Reject(err),
            Err(err) => {
                warn!(verifier = %self.verifier_name, error = %err, "Credential verifier failed");
                FilterResult::Reject(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VerifierRegistry {
        let mut configured = HashMap::new();
        configured.insert(
            "frontend".to_string(),
            VerifierConfig::Static {
                tokens: vec!["good-token".to_string()],
            },
        );
        VerifierRegistry::new().with_configured(&configured)
    }

    fn request_with(name: &str, value: &str) -> Request<Body> {
        let mut req = Request::new(Body::empty());
        req.headers_mut().insert(
            HeaderName::from_str(name).unwrap(),
            value.parse().unwrap(),
        );
        req
    }

    #[tokio::test]
    async fn test_bearer_accepts_valid_token() {
        let filter = AuthFilter::new(AuthScheme::Bearer, "frontend", None, &registry()).unwrap();
        let mut req = request_with("authorization", "Bearer good-token");

        assert!(matches!(filter.on_request(&mut req).await, FilterResult::Continue));
        let principal = req.extensions().get::<Principal>().unwrap();
        assert_eq!(principal.verifier, "frontend");
    }

    #[tokio::test]
    async fn test_bearer_rejects_missing_and_invalid() {
        let filter = AuthFilter::new(AuthScheme::Bearer, "frontend", None, &registry()).unwrap();

        let mut missing = Request::new(Body::empty());
        let mut wrong = request_with("authorization", "Bearer nope");
        let mut basic = request_with("authorization", "Basic good-token");

        for req in [&mut missing, &mut wrong, &mut basic] {
            match filter.on_request(req).await {
                FilterResult::Reject(GatewayError::Unauthorized { .. }) => {}
                _ => panic!("expected unauthorized"),
            }
            assert!(req.extensions().get::<Principal>().is_none());
        }
    }

    #[tokio::test]
    async fn test_api_key_header() {
        let filter =
            AuthFilter::new(AuthScheme::ApiKey, "frontend", None, &registry()).unwrap();
        let mut req = request_with("x-api-key", "good-token");
        assert!(matches!(filter.on_request(&mut req).await, FilterResult::Continue));

        let custom =
            AuthFilter::new(AuthScheme::ApiKey, "frontend", Some("x-school-key"), &registry())
                .unwrap();
        let mut req = request_with("x-api-key", "good-token");
        assert!(matches!(custom.on_request(&mut req).await, FilterResult::Reject(_)));
    }

    #[test]
    fn test_unknown_verifier_is_configuration_error() {
        let err = AuthFilter::new(AuthScheme::Bearer, "missing", None, &registry()).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigurationInvalid { .. }));
    }

    struct DenyAll;

    #[async_trait]
    impl CredentialVerifier for DenyAll {
        async fn verify(&self, _credential: &str) -> GatewayResult<Principal> {
            Err(GatewayError::unauthorized("denied"))
        }
    }

    #[tokio::test]
    async fn test_registered_verifier_shadows_configured() {
        let mut base = VerifierRegistry::new();
        base.register("frontend", Arc::new(DenyAll));
        let mut configured = HashMap::new();
        configured.insert(
            "frontend".to_string(),
            VerifierConfig::Static {
                tokens: vec!["good-token".to_string()],
            },
        );
        let merged = base.with_configured(&configured);

        let filter = AuthFilter::new(AuthScheme::Bearer, "frontend", None, &merged).unwrap();
        let mut req = request_with("authorization", "Bearer good-token");
        assert!(matches!(filter.on_request(&mut req).await, FilterResult::Reject(_)));
    }
}
