//! Per-route capability table and the composer that turns a policy into a
//! concrete [`Pipeline`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::server::pipeline::{AuthenticationStage, DecryptionStage, Pipeline, Stage};

/// What a route needs from the boundary before its handler may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy {
    pub requires_auth: bool,
    pub requires_decryption: bool,
}

impl RoutePolicy {
    /// No token, plaintext (or empty) body.
    pub const fn public() -> Self {
        Self { requires_auth: false, requires_decryption: false }
    }

    /// Anonymous caller, encrypted body (signup, login).
    pub const fn encrypted() -> Self {
        Self { requires_auth: false, requires_decryption: true }
    }

    /// Bearer token, no body.
    pub const fn authenticated() -> Self {
        Self { requires_auth: true, requires_decryption: false }
    }

    pub const fn authenticated_encrypted() -> Self {
        Self { requires_auth: true, requires_decryption: true }
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::authenticated_encrypted()
    }
}

/// Explicit allow-list of route policies keyed by `(METHOD, pattern)`.
///
/// Anything not listed gets the strictest policy.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<(String, String), RoutePolicy>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: &str, pattern: &str, policy: RoutePolicy) -> Self {
        self.insert(method, pattern, policy);
        self
    }

    pub fn insert(&mut self, method: &str, pattern: &str, policy: RoutePolicy) {
        let key = (method.to_ascii_uppercase(), pattern.to_string());
        if let Some(previous) = self.routes.insert(key, policy) {
            tracing::warn!("Route {} {} registered twice (was {:?})", method, pattern, previous);
        }
    }

    pub fn lookup(&self, method: &str, pattern: &str) -> RoutePolicy {
        let key = (method.to_ascii_uppercase(), pattern.to_string());
        match self.routes.get(&key) {
            Some(policy) => *policy,
            None => {
                tracing::debug!("No policy for {} {}, applying strictest", method, pattern);
                RoutePolicy::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builds the ordered stage list for a route: authenticate, then decrypt.
#[derive(Clone)]
pub struct PipelineComposer {
    authentication: Arc<AuthenticationStage>,
    decryption: Arc<DecryptionStage>,
    table: Arc<RouteTable>,
}

impl PipelineComposer {
    pub fn new(authentication: AuthenticationStage, decryption: DecryptionStage, table: RouteTable) -> Self {
        Self {
            authentication: Arc::new(authentication),
            decryption: Arc::new(decryption),
            table: Arc::new(table),
        }
    }

    pub fn policy(&self, method: &str, pattern: &str) -> RoutePolicy {
        self.table.lookup(method, pattern)
    }

    pub fn compose(&self, method: &str, pattern: &str) -> Pipeline {
        self.for_policy(self.policy(method, pattern))
    }

    pub fn for_policy(&self, policy: RoutePolicy) -> Pipeline {
        let mut pipeline = Pipeline::new();
        if policy.requires_auth {
            pipeline = pipeline.with_stage(self.authentication.clone() as Arc<dyn Stage>);
        }
        if policy.requires_decryption {
            pipeline = pipeline.with_stage(self.decryption.clone() as Arc<dyn Stage>);
        }
        pipeline
    }
}

impl std::fmt::Debug for PipelineComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineComposer")
            .field("routes", &self.table.len())
            .finish()
    }
}
