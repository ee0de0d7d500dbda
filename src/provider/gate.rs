/*!
 * Permission Gate
 *
 * Consulted before a provider is built and before every group is opened.
 * Policy evaluation lives outside this crate; the provider only asks.
 */

use crate::pool::PoolKind;
use serde::Serialize;

/// What the provider is about to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GateRequest {
    CreateProvider,
    OpenGroup { kind: PoolKind, size: isize },
}

/// Gate verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(String),
}

impl GateDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        GateDecision::Deny(reason.into())
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

pub trait PermissionGate: Send + Sync {
    fn check(&self, request: &GateRequest) -> GateDecision;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Gate that allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn check(&self, _request: &GateRequest) -> GateDecision {
        GateDecision::Allow
    }

    fn name(&self) -> &str {
        "allow_all"
    }
}

impl<F> PermissionGate for F
where
    F: Fn(&GateRequest) -> GateDecision + Send + Sync,
{
    fn check(&self, request: &GateRequest) -> GateDecision {
        self(request)
    }

    fn name(&self) -> &str {
        "closure"
    }
}
