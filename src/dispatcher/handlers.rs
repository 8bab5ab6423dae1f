//! Handlers for the topics that do not decompose events.

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info};

use super::router::Outcome;
use super::{now, Dispatcher};
use crate::error::DispatchError;
use crate::misp::message::require;
use crate::misp::Organisation;
use crate::sinks::{Contribution, ContributionKind, FeedKind};

/// Discussion name used until posts carry their thread title.
pub const UNNAMED_DISCUSSION: &str = "no name or id yet...";

#[derive(Debug, Deserialize)]
struct KeepalivePayload {
    uptime: JsonValue,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    action: Option<String>,
    #[serde(rename = "User")]
    user: Option<JsonValue>,
    #[serde(rename = "Organisation")]
    organisation: Option<Organisation>,
}

#[derive(Debug, Deserialize)]
struct Post {
    org_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationPayload {
    #[serde(rename = "Post")]
    post: Option<Post>,
}

#[derive(Debug, Deserialize)]
struct AuditLog {
    action: Option<String>,
    email: Option<String>,
    org: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuditPayload {
    action: Option<String>,
    #[serde(rename = "Log")]
    log: Option<AuditLog>,
}

fn parse<T: serde::de::DeserializeOwned>(
    payload: JsonValue,
    what: &str,
) -> Result<T, DispatchError> {
    serde_json::from_value(payload)
        .map_err(|e| DispatchError::Decode(format!("invalid {} payload: {}", what, e)))
}

impl Dispatcher {
    /// `misp_json_self`: republishes the uptime as a one-element record.
    pub(crate) async fn handle_keepalive(
        &self,
        source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let payload: KeepalivePayload = parse(payload, "keepalive")?;
        self.sinks
            .live
            .publish_log(source, FeedKind::Keepalive, json!([payload.uptime]))
            .await?;
        Ok(Outcome::Handled)
    }

    /// `misp_json_user`
    pub(crate) async fn handle_user(
        &self,
        _source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let payload: UserPayload = parse(payload, "user")?;
        let action = require(&payload.action, "action")?;
        require(&payload.user, "User")?;
        let org = require(&payload.organisation, "Organisation")?;
        let org = require(&org.name, "Organisation.name")?;
        debug!(action = %action, org = %org, "User message");
        Ok(Outcome::Handled)
    }

    /// `misp_json_conversation`
    pub(crate) async fn handle_conversation(
        &self,
        source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let payload: ConversationPayload = parse(payload, "conversation")?;
        let Some(post) = payload.post else {
            error!("Conversation message without a post");
            return Ok(Outcome::Skipped("conversation without post".to_string()));
        };
        let org = require(&post.org_name, "Post.org_name")?;

        let mut contribution = Contribution::new(source, org, ContributionKind::Discussion);
        contribution.action = Some("add".to_string());
        self.sinks
            .contributions
            .handle_contribution(contribution)
            .await?;
        self.sinks
            .trends
            .add_trending_discussion(UNNAMED_DISCUSSION, now())
            .await?;
        Ok(Outcome::Handled)
    }

    /// `misp_json_audit`: records user logins.
    pub(crate) async fn handle_audit(
        &self,
        _source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let payload: AuditPayload = parse(payload, "audit")?;
        let (Some(action), Some(log)) = (payload.action.as_deref(), payload.log.as_ref()) else {
            return Ok(Outcome::Skipped("audit without action or log".to_string()));
        };

        if action != "log" || log.action.as_deref() != Some("login") {
            return Ok(Outcome::Skipped(format!("audit action {}", action)));
        }

        self.sinks
            .users
            .add_user_login(
                now(),
                log.org.as_deref().unwrap_or_default(),
                log.email.as_deref().unwrap_or_default(),
            )
            .await?;
        Ok(Outcome::Handled)
    }

    /// `diagnostic_channel`: stores the delay between the embedded send
    /// time and now. Failures are logged, never raised.
    pub(crate) async fn handle_diagnostic(&self, source: &str, payload: JsonValue) -> Outcome {
        let Some(sent) = diagnostic_timestamp(&payload) else {
            error!(source = %source, "Diagnostic payload carries no timestamp");
            return Outcome::Skipped("diagnostic without timestamp".to_string());
        };

        let elapsed = unix_now() - sent;
        if let Err(e) = self
            .sinks
            .diagnostics
            .store(&self.settings.diagnostic_key, &elapsed.to_string())
            .await
        {
            error!(error = %e, "Failed to store diagnostic response time");
            return Outcome::Skipped("diagnostic store failed".to_string());
        }

        Outcome::Handled
    }

    /// Topics that are recognized but not processed.
    pub(crate) fn handle_skip(&self, _source: &str, _payload: JsonValue) -> Outcome {
        info!("Log not processed");
        Outcome::Skipped("not processed".to_string())
    }
}

/// Accepts `{"content": ts}`, a bare number or a numeric string.
fn diagnostic_timestamp(payload: &JsonValue) -> Option<f64> {
    let value = payload.get("content").unwrap_or(payload);
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Allowlist, DispatchSettings};
    use crate::misp::{CascadeCheck, ResolverError};
    use crate::sinks::{RecordingSinks, SinkCall, Sinks};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoRemote;

    #[async_trait]
    impl CascadeCheck for NoRemote {
        async fn has_cascade_tag(&self, _event_id: &str) -> Result<bool, ResolverError> {
            Ok(false)
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<RecordingSinks>) {
        let recorder = Arc::new(RecordingSinks::new());
        let dispatcher = Dispatcher::new(
            Allowlist::default(),
            Sinks::from_parts(recorder.clone(), recorder.clone()),
            Arc::new(NoRemote),
            DispatchSettings::default(),
        );
        (dispatcher, recorder)
    }

    #[tokio::test]
    async fn test_keepalive_publishes_uptime() {
        let (dispatcher, recorder) = dispatcher();
        dispatcher
            .handle_keepalive("1", json!({"uptime": 123}))
            .await
            .unwrap();

        assert_eq!(
            recorder.calls(),
            vec![SinkCall::Publish {
                source: "1".to_string(),
                kind: FeedKind::Keepalive,
                record: json!([123]),
            }]
        );
    }

    #[tokio::test]
    async fn test_keepalive_without_uptime_fails() {
        let (dispatcher, _recorder) = dispatcher();
        assert!(dispatcher.handle_keepalive("1", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_user_requires_org_name() {
        let (dispatcher, recorder) = dispatcher();
        let ok = json!({"action": "edit", "User": {"email": "a@b"}, "Organisation": {"name": "CIRCL"}});
        assert!(matches!(
            dispatcher.handle_user("1", ok).await.unwrap(),
            Outcome::Handled
        ));

        let missing = json!({"action": "edit", "User": {}, "Organisation": {}});
        let err = dispatcher.handle_user("1", missing).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingField(f) if f == "Organisation.name"));
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_contributes_discussion() {
        let (dispatcher, recorder) = dispatcher();
        dispatcher
            .handle_conversation("1", json!({"Post": {"org_name": "CIRCL", "id": "3"}}))
            .await
            .unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            SinkCall::Contribution(c) => {
                assert_eq!(c.kind, ContributionKind::Discussion);
                assert_eq!(c.action.as_deref(), Some("add"));
                assert!(c.category.is_none());
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert!(matches!(
            &calls[1],
            SinkCall::TrendingDiscussion { name, .. } if name == UNNAMED_DISCUSSION
        ));
    }

    #[tokio::test]
    async fn test_conversation_without_post_is_skipped() {
        let (dispatcher, recorder) = dispatcher();
        let outcome = dispatcher
            .handle_conversation("1", json!({"Thread": {}}))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_audit_records_logins_only() {
        let (dispatcher, recorder) = dispatcher();
        let login = json!({
            "action": "log",
            "Log": {"action": "login", "email": "analyst@example.org", "org": "CIRCL"}
        });
        let logout = json!({"action": "log", "Log": {"action": "logout"}});

        dispatcher.handle_audit("1", login).await.unwrap();
        dispatcher.handle_audit("1", logout).await.unwrap();

        let logins: Vec<_> = recorder
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::UserLogin { org, email, .. } => Some((org, email)),
                _ => None,
            })
            .collect();
        assert_eq!(
            logins,
            vec![("CIRCL".to_string(), "analyst@example.org".to_string())]
        );
    }

    #[tokio::test]
    async fn test_diagnostic_stores_elapsed_time() {
        let (dispatcher, recorder) = dispatcher();
        let sent = unix_now() - 2.0;

        let outcome = dispatcher
            .handle_diagnostic("1", json!({"content": sent.to_string()}))
            .await;

        assert!(matches!(outcome, Outcome::Handled));
        match recorder.calls().as_slice() {
            [SinkCall::Diagnostic { key, value }] => {
                assert_eq!(key, "diagnostic_tool_response");
                let elapsed: f64 = value.parse().unwrap();
                assert!(elapsed >= 2.0 && elapsed < 60.0, "elapsed {}", elapsed);
            }
            other => panic!("unexpected calls {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_diagnostic_failure_is_logged_not_raised() {
        let (dispatcher, recorder) = dispatcher();
        let outcome = dispatcher
            .handle_diagnostic("1", json!({"content": "not a time"}))
            .await;
        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn test_diagnostic_timestamp_forms() {
        assert_eq!(diagnostic_timestamp(&json!(12.5)), Some(12.5));
        assert_eq!(diagnostic_timestamp(&json!("7")), Some(7.0));
        assert_eq!(diagnostic_timestamp(&json!({"content": 3})), Some(3.0));
        assert_eq!(diagnostic_timestamp(&json!({"other": 3})), None);
    }
}
