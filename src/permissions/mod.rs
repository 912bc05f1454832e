//! Tool permission decisions.
//!
//! The peer asks `can_use_tool` before running a tool. The answer comes from,
//! in order:
//!
//! 1. a decision a `PreToolUse` hook already made for the same tool use
//! 2. the caller's [`CanUseTool`] callback
//! 3. the [`PermissionFallback`] derived from the permission mode

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::PermissionMode;
use crate::hooks::{HookOutput, PermissionDecision};
use crate::{BoxError, Error, Result};

/// Answer to a permission check.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionResult {
    Allow {
        /// Replacement input; the original is echoed back when absent.
        updated_input: Option<Value>,
        updated_permissions: Option<Vec<Value>>,
    },
    Deny {
        message: String,
        /// Also interrupt the current turn.
        interrupt: bool,
    },
}

impl PermissionResult {
    pub fn allow() -> Self {
        PermissionResult::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    pub fn allow_with_input(input: Value) -> Self {
        PermissionResult::Allow {
            updated_input: Some(input),
            updated_permissions: None,
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        PermissionResult::Deny {
            message: message.into(),
            interrupt: false,
        }
    }

    pub fn deny_and_interrupt(message: impl Into<String>) -> Self {
        PermissionResult::Deny {
            message: message.into(),
            interrupt: true,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, PermissionResult::Allow { .. })
    }

    /// Wire shape of the answer.
    pub fn to_wire(&self, original_input: &Value) -> Value {
        match self {
            PermissionResult::Allow {
                updated_input,
                updated_permissions,
            } => {
                let mut value = json!({
                    "behavior": "allow",
                    "updatedInput": updated_input.as_ref().unwrap_or(original_input),
                });
                if let Some(permissions) = updated_permissions {
                    value["updatedPermissions"] = json!(permissions);
                }
                value
            }
            PermissionResult::Deny { message, interrupt } => {
                let mut value = json!({"behavior": "deny", "message": message});
                if *interrupt {
                    value["interrupt"] = json!(true);
                }
                value
            }
        }
    }
}

/// Context of a permission check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolPermissionContext {
    /// Permission rule updates the peer suggests.
    pub suggestions: Vec<Value>,
    /// Path that triggered the check, if any.
    pub blocked_path: Option<String>,
    pub tool_use_id: Option<String>,
}

/// Caller-supplied permission callback.
///
/// Implemented for any
/// `Fn(String, Value, ToolPermissionContext) -> impl Future<Output = Result<PermissionResult, BoxError>>`.
#[async_trait]
pub trait CanUseTool: Send + Sync {
    async fn can_use_tool(
        &self,
        tool_name: &str,
        input: &Value,
        context: &ToolPermissionContext,
    ) -> std::result::Result<PermissionResult, BoxError>;
}

#[async_trait]
impl<F, Fut> CanUseTool for F
where
    F: Fn(String, Value, ToolPermissionContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<PermissionResult, BoxError>> + Send,
{
    async fn can_use_tool(
        &self,
        tool_name: &str,
        input: &Value,
        context: &ToolPermissionContext,
    ) -> std::result::Result<PermissionResult, BoxError> {
        (self)(tool_name.to_string(), input.clone(), context.clone()).await
    }
}

/// Answer used when no callback is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionFallback {
    AllowAll,
    DenyAll,
}

impl PermissionFallback {
    /// Bypass mode allows everything; every other mode denies.
    pub fn for_mode(mode: PermissionMode) -> Self {
        match mode {
            PermissionMode::BypassPermissions => PermissionFallback::AllowAll,
            _ => PermissionFallback::DenyAll,
        }
    }

    fn result(self, tool_name: &str) -> PermissionResult {
        match self {
            PermissionFallback::AllowAll => PermissionResult::allow(),
            PermissionFallback::DenyAll => PermissionResult::deny(format!(
                "permission to use {tool_name} was not granted"
            )),
        }
    }
}

/// Hook decisions kept for tool uses the peer has not asked about yet.
const MAX_HOOK_DECISIONS: usize = 64;

/// Hook decisions by tool use id, oldest evicted first.
#[derive(Default)]
struct HookDecisions {
    by_id: HashMap<String, PermissionResult>,
    order: VecDeque<String>,
}

impl HookDecisions {
    fn insert(&mut self, tool_use_id: &str, decision: PermissionResult) {
        if self.by_id.insert(tool_use_id.to_string(), decision).is_some() {
            return;
        }
        self.order.push_back(tool_use_id.to_string());
        while self.order.len() > MAX_HOOK_DECISIONS {
            if let Some(oldest) = self.order.pop_front() {
                self.by_id.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, tool_use_id: &str) -> Option<PermissionResult> {
        let decision = self.by_id.remove(tool_use_id)?;
        self.order.retain(|id| id != tool_use_id);
        Some(decision)
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

/// Decides `can_use_tool` requests.
pub struct PermissionBroker {
    callback: Option<Arc<dyn CanUseTool>>,
    fallback: PermissionFallback,
    hook_decisions: Mutex<HookDecisions>,
}

impl PermissionBroker {
    pub fn new(callback: Option<Arc<dyn CanUseTool>>, fallback: PermissionFallback) -> Self {
        Self {
            callback,
            fallback,
            hook_decisions: Mutex::new(HookDecisions::default()),
        }
    }

    /// Remember an allow/deny a `PreToolUse` hook made for a tool use.
    ///
    /// `ask` and outputs without a decision are not remembered. Only the
    /// most recent decisions are kept.
    pub fn record_hook_decision(&self, tool_use_id: &str, output: &HookOutput) {
        let decision = if output.is_deny() {
            PermissionResult::deny(output.deny_reason().unwrap_or("denied by hook"))
        } else if output.permission_decision() == Some(PermissionDecision::Allow) {
            PermissionResult::Allow {
                updated_input: output.updated_input().cloned(),
                updated_permissions: None,
            }
        } else {
            return;
        };
        if let Ok(mut decisions) = self.hook_decisions.lock() {
            decisions.insert(tool_use_id, decision);
        }
    }

    /// Drop the decision for a tool use that already ran.
    pub fn forget_hook_decision(&self, tool_use_id: &str) {
        if let Ok(mut decisions) = self.hook_decisions.lock() {
            decisions.remove(tool_use_id);
        }
    }

    fn take_hook_decision(&self, tool_use_id: Option<&str>) -> Option<PermissionResult> {
        let id = tool_use_id?;
        self.hook_decisions.lock().ok()?.remove(id)
    }

    fn retained_hook_decisions(&self) -> usize {
        self.hook_decisions.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Decide a permission check.
    ///
    /// A callback error is returned as [`Error::Callback`] and becomes an
    /// error response to the peer.
    pub async fn decide(
        &self,
        tool_name: &str,
        input: &Value,
        context: &ToolPermissionContext,
    ) -> Result<PermissionResult> {
        if let Some(decision) = self.take_hook_decision(context.tool_use_id.as_deref()) {
            tracing::debug!(tool = tool_name, allow = decision.is_allow(), "permission answered by hook");
            return Ok(decision);
        }
        match &self.callback {
            Some(callback) => callback
                .can_use_tool(tool_name, input, context)
                .await
                .map_err(|e| Error::callback(&e)),
            None => Ok(self.fallback.result(tool_name)),
        }
    }
}

impl std::fmt::Debug for PermissionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionBroker")
            .field("callback", &self.callback.is_some())
            .field("fallback", &self.fallback)
            .field("hook_decisions", &self.retained_hook_decisions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(tool_use_id: &str) -> ToolPermissionContext {
        ToolPermissionContext {
            tool_use_id: Some(tool_use_id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn wire_shapes() {
        let input = json!({"command": "ls"});
        assert_eq!(
            PermissionResult::allow().to_wire(&input),
            json!({"behavior": "allow", "updatedInput": {"command": "ls"}})
        );
        assert_eq!(
            PermissionResult::allow_with_input(json!({"command": "ls -a"})).to_wire(&input),
            json!({"behavior": "allow", "updatedInput": {"command": "ls -a"}})
        );
        assert_eq!(
            PermissionResult::deny_and_interrupt("stop").to_wire(&input),
            json!({"behavior": "deny", "message": "stop", "interrupt": true})
        );
    }

    #[tokio::test]
    async fn fallback_follows_mode() {
        let broker = PermissionBroker::new(
            None,
            PermissionFallback::for_mode(PermissionMode::BypassPermissions),
        );
        let result = broker.decide("Bash", &json!({}), &context("t1")).await.unwrap();
        assert!(result.is_allow());

        let broker = PermissionBroker::new(None, PermissionFallback::for_mode(PermissionMode::Default));
        let result = broker.decide("Bash", &json!({}), &context("t1")).await.unwrap();
        assert!(!result.is_allow());
    }

    #[tokio::test]
    async fn callback_errors_become_callback_errors() {
        let callback = |_name: String, _input: Value, _ctx: ToolPermissionContext| async {
            Err::<PermissionResult, BoxError>("db offline".into())
        };
        let broker = PermissionBroker::new(Some(Arc::new(callback)), PermissionFallback::AllowAll);
        let err = broker.decide("Bash", &json!({}), &context("t1")).await.unwrap_err();
        assert!(matches!(err, Error::Callback { message } if message == "db offline"));
    }

    #[tokio::test]
    async fn hook_decision_skips_callback_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback = move |_name: String, _input: Value, _ctx: ToolPermissionContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(PermissionResult::allow())
            }
        };
        let broker = PermissionBroker::new(Some(Arc::new(callback)), PermissionFallback::DenyAll);
        broker.record_hook_decision("toolu_1", &HookOutput::deny("blocked by policy"));

        let first = broker.decide("Bash", &json!({}), &context("toolu_1")).await.unwrap();
        assert_eq!(first, PermissionResult::deny("blocked by policy"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let second = broker.decide("Bash", &json!({}), &context("toolu_1")).await.unwrap();
        assert!(second.is_allow());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hook_allow_carries_updated_input() {
        let broker = PermissionBroker::new(None, PermissionFallback::DenyAll);
        broker.record_hook_decision(
            "toolu_2",
            &HookOutput::allow().with_updated_input(json!({"path": "/safe"})),
        );
        broker.record_hook_decision("toolu_3", &HookOutput::empty());

        let result = broker.decide("Write", &json!({}), &context("toolu_2")).await.unwrap();
        assert_eq!(result, PermissionResult::allow_with_input(json!({"path": "/safe"})));
        let result = broker.decide("Write", &json!({}), &context("toolu_3")).await.unwrap();
        assert!(!result.is_allow());
    }

    #[tokio::test]
    async fn unanswered_hook_decisions_are_capped() {
        let broker = PermissionBroker::new(None, PermissionFallback::AllowAll);
        for i in 0..10_000 {
            broker.record_hook_decision(&format!("toolu_{i}"), &HookOutput::deny("no"));
        }
        assert_eq!(broker.retained_hook_decisions(), MAX_HOOK_DECISIONS);

        // The oldest were evicted; the newest still apply.
        let old = broker.decide("Bash", &json!({}), &context("toolu_0")).await.unwrap();
        assert!(old.is_allow());
        let recent = broker.decide("Bash", &json!({}), &context("toolu_9999")).await.unwrap();
        assert!(!recent.is_allow());
    }

    #[tokio::test]
    async fn finished_tool_uses_forget_their_decision() {
        let broker = PermissionBroker::new(None, PermissionFallback::AllowAll);
        broker.record_hook_decision("toolu_1", &HookOutput::deny("no"));
        broker.record_hook_decision("toolu_1", &HookOutput::deny("still no"));
        assert_eq!(broker.retained_hook_decisions(), 1);

        broker.forget_hook_decision("toolu_1");
        assert_eq!(broker.retained_hook_decisions(), 0);
        let result = broker.decide("Bash", &json!({}), &context("toolu_1")).await.unwrap();
        assert!(result.is_allow());
    }
}
