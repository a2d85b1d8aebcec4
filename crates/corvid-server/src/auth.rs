//! Operator identity resolution for inbound calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use corvid_protocol::{RpcStatus, AUTHORIZATION_KEY, BEARER_SCHEME, LOCAL_OPERATOR};

use crate::identity::{token_digest, IdentityCache};
use crate::operators::OperatorStore;
use crate::pipeline::{Call, Interceptor};

/// How the caller reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Local,
    Mtls,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Local => "local",
            Transport::Mtls => "mtls",
        }
    }
}

/// Identity attached to a call once it is authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub transport: Transport,
    pub operator: String,
}

/// Extract the token from `authorization: Bearer <token>`. The scheme is
/// matched case-insensitively.
pub fn bearer_token(metadata: &BTreeMap<String, String>) -> Result<&str, RpcStatus> {
    let value = metadata
        .get(AUTHORIZATION_KEY)
        .ok_or_else(|| RpcStatus::unauthenticated("Authentication failure"))?;
    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| RpcStatus::unauthenticated("Authentication failure"))?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return Err(RpcStatus::unauthenticated("Authentication failure"));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(RpcStatus::unauthenticated("Authentication failure"));
    }
    Ok(token)
}

pub enum Authenticator {
    /// Every call is the local `server` operator.
    Local,
    /// Bearer tokens resolved through the cache, then the operator store.
    Token {
        cache: Arc<IdentityCache>,
        store: Arc<dyn OperatorStore>,
    },
}

impl Authenticator {
    pub fn from_config(
        remote_auth: bool,
        cache: Arc<IdentityCache>,
        store: Arc<dyn OperatorStore>,
    ) -> Self {
        if remote_auth {
            Authenticator::Token { cache, store }
        } else {
            Authenticator::Local
        }
    }

    pub async fn authenticate(
        &self,
        metadata: &BTreeMap<String, String>,
    ) -> Result<CallContext, RpcStatus> {
        let (cache, store) = match self {
            Authenticator::Local => {
                return Ok(CallContext {
                    transport: Transport::Local,
                    operator: LOCAL_OPERATOR.to_string(),
                })
            }
            Authenticator::Token { cache, store } => (cache, store),
        };

        let token = bearer_token(metadata)?;
        let digest = token_digest(token);
        if let Some(name) = cache.get(&digest) {
            tracing::trace!(operator = %name, "Token cache hit");
            return Ok(CallContext { transport: Transport::Mtls, operator: name });
        }

        match store.operator_by_token(&digest).await {
            Ok(Some(operator)) => {
                cache.put(digest, operator.name.clone());
                tracing::debug!(operator = %operator.name, "Operator authenticated");
                Ok(CallContext { transport: Transport::Mtls, operator: operator.name })
            }
            Ok(None) => {
                tracing::warn!("Authentication failure: unknown token");
                Err(RpcStatus::unauthenticated("Authentication failure"))
            }
            Err(e) => {
                tracing::error!(error = %e, "Operator lookup failed");
                Err(RpcStatus::unauthenticated("Authentication failure"))
            }
        }
    }

    /// Drop every cached identity. The next call of each operator goes back
    /// to the store.
    pub fn clear_token_cache(&self) {
        if let Authenticator::Token { cache, .. } = self {
            cache.clear();
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Authenticator::Token { .. })
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authenticator::Local => f.write_str("Authenticator::Local"),
            Authenticator::Token { cache, .. } => f
                .debug_struct("Authenticator::Token")
                .field("cached", &cache.len())
                .finish(),
        }
    }
}

/// First stage of both pipelines.
pub struct AuthInterceptor {
    authenticator: Arc<Authenticator>,
}

impl AuthInterceptor {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn on_request(&self, call: &mut Call) -> Result<(), RpcStatus> {
        if call.context.is_some() {
            return Ok(());
        }
        let context = self.authenticator.authenticate(&call.metadata).await?;
        call.context = Some(context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(value: &str) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert(AUTHORIZATION_KEY.to_string(), value.to_string());
        m
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(&meta("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&meta("bearer  abc ")).unwrap(), "abc");
        assert!(bearer_token(&BTreeMap::new()).is_err());
        assert!(bearer_token(&meta("Basic abc")).is_err());
        assert!(bearer_token(&meta("Bearer")).is_err());
        assert!(bearer_token(&meta("Bearer   ")).is_err());
    }

    #[tokio::test]
    async fn local_ignores_metadata() {
        let ctx = Authenticator::Local.authenticate(&BTreeMap::new()).await.unwrap();
        assert_eq!(ctx.operator, LOCAL_OPERATOR);
        assert_eq!(ctx.transport, Transport::Local);
    }
}
