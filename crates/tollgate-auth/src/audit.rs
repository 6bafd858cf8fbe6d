//! Security audit events

use crate::{principal::Role, traits::AuditSink, utils::mask_identifier, AuthResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Kind of audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailure,
    LoginLocked,
    TokenRefreshed,
    TokenRefreshFailed,
    TokenReuseDetected,
    Logout,
    ForceLogout,
    ForceLogoutDenied,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailure => "login_failure",
            AuditEventType::LoginLocked => "login_locked",
            AuditEventType::TokenRefreshed => "token_refreshed",
            AuditEventType::TokenRefreshFailed => "token_refresh_failed",
            AuditEventType::TokenReuseDetected => "token_reuse_detected",
            AuditEventType::Logout => "logout",
            AuditEventType::ForceLogout => "force_logout",
            AuditEventType::ForceLogoutDenied => "force_logout_denied",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller details attached to audit events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub principal_id: Option<String>,
    pub role: Option<Role>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        success: bool,
        context: &RequestContext,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            principal_id: None,
            role: None,
            ip: context.ip.clone(),
            user_agent: context.user_agent.clone(),
            success,
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>, role: Role) -> Self {
        self.principal_id = Some(principal_id.into());
        self.role = Some(role);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Writes audit events as structured `tracing` events under the `tollgate::audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> AuthResult<()> {
        let principal = event.principal_id.as_deref().map(mask_identifier).unwrap_or_default();
        let role = event.role.map(|r| r.as_str()).unwrap_or("-");
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        if event.success {
            info!(
                target: "tollgate::audit",
                event = %event.event_type,
                principal = %principal,
                role,
                ip = event.ip.as_deref().unwrap_or("-"),
                user_agent = event.user_agent.as_deref().unwrap_or("-"),
                success = event.success,
                metadata = %metadata,
                "audit"
            );
        } else {
            warn!(
                target: "tollgate::audit",
                event = %event.event_type,
                principal = %principal,
                role,
                ip = event.ip.as_deref().unwrap_or("-"),
                user_agent = event.user_agent.as_deref().unwrap_or("-"),
                success = event.success,
                metadata = %metadata,
                "audit"
            );
        }
        Ok(())
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: &AuditEvent) -> AuthResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let context = RequestContext::new("10.0.0.1", "curl/8.0");
        let event = AuditEvent::new(AuditEventType::LoginFailure, false, &context, Utc::now())
            .with_role(Role::Operator)
            .with_metadata("remaining_attempts", 4);

        assert_eq!(event.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(event.role, Some(Role::Operator));
        assert!(event.principal_id.is_none());
        assert_eq!(event.metadata["remaining_attempts"], serde_json::json!(4));
    }

    #[test]
    fn test_event_type_serialization() {
        assert_eq!(
            serde_json::to_string(&AuditEventType::TokenReuseDetected).unwrap(),
            "\"token_reuse_detected\""
        );
        assert_eq!(AuditEventType::ForceLogoutDenied.to_string(), "force_logout_denied");
    }

    #[tokio::test]
    async fn test_sinks_accept_events() {
        let context = RequestContext::default();
        let event = AuditEvent::new(AuditEventType::Logout, true, &context, Utc::now())
            .with_principal("42", Role::Admin);

        assert!(TracingAuditSink.record(&event).await.is_ok());
        assert!(NoopAuditSink.record(&event).await.is_ok());
    }
}
