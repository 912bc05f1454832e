//! Running hook callbacks and folding their outputs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use serde_json::{json, Value};

use super::matcher::{HookMatcher, Hooks};
use super::types::{HookDecision, HookEvent, HookInput, HookOutput, PermissionDecision};
use crate::{BoxError, Error, Result};

/// Diagnostics retained per query.
const MAX_DIAGNOSTICS: usize = 64;

/// Identifies one registered callback in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb_{}", self.0)
    }
}

/// A callback that failed or timed out. Its output counted as empty.
#[derive(Debug, Clone, PartialEq)]
pub struct HookFailure {
    pub event: HookEvent,
    pub callback: CallbackId,
    pub message: String,
}

/// Result of running every matching callback for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct HookOutcome {
    pub event: HookEvent,
    pub output: HookOutput,
    pub failures: Vec<HookFailure>,
}

struct Group {
    matcher: HookMatcher,
    ids: Vec<CallbackId>,
}

struct EventHooks {
    handle: String,
    groups: Vec<Group>,
}

/// Resolves peer hook handles to local callbacks.
///
/// The peer sees one handle per event (`hook_0`, `hook_1`, ...) registered
/// with a match-all matcher; matching and folding happen here.
pub struct HookDispatcher {
    events: BTreeMap<HookEvent, EventHooks>,
    handles: HashMap<String, HookEvent>,
}

impl HookDispatcher {
    pub fn new(hooks: &Hooks) -> Self {
        let mut events = BTreeMap::new();
        let mut handles = HashMap::new();
        let mut next_callback = 0u64;

        for (index, event) in hooks.events().enumerate() {
            let handle = format!("hook_{index}");
            let groups = hooks.groups[&event]
                .iter()
                .map(|matcher| {
                    let ids = matcher
                        .callbacks
                        .iter()
                        .map(|_| {
                            next_callback += 1;
                            CallbackId(next_callback)
                        })
                        .collect();
                    Group {
                        matcher: matcher.clone(),
                        ids,
                    }
                })
                .collect();
            handles.insert(handle.clone(), event);
            events.insert(event, EventHooks { handle, groups });
        }

        Self { events, handles }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Handle the peer uses for an event.
    pub fn handle_for(&self, event: HookEvent) -> Option<&str> {
        self.events.get(&event).map(|hooks| hooks.handle.as_str())
    }

    /// The `hooks` field of the `initialize` request, or `None` with no hooks.
    ///
    /// The advertised timeout is the sum of the group deadlines when every
    /// group declares one.
    pub fn initialize_payload(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let mut payload = serde_json::Map::new();
        for (event, hooks) in &self.events {
            let mut entry = json!({
                "matcher": null,
                "hookCallbackIds": [hooks.handle],
            });
            let deadlines: Option<Vec<_>> =
                hooks.groups.iter().map(|g| g.matcher.timeout).collect();
            if let Some(deadlines) = deadlines {
                let total: u64 = deadlines.iter().map(|d| d.as_secs().max(1)).sum();
                entry["timeout"] = json!(total);
            }
            payload.insert(event.as_str().to_string(), json!([entry]));
        }
        Some(Value::Object(payload))
    }

    /// Answer a `hook_callback` request.
    pub async fn invoke(
        &self,
        handle: &str,
        payload: Value,
        tool_use_id: Option<String>,
    ) -> Result<HookOutcome> {
        let event = *self.handles.get(handle).ok_or_else(|| Error::Callback {
            message: format!("no hook callback registered for id {handle}"),
        })?;
        Ok(self.dispatch(HookInput::new(event, payload, tool_use_id)).await)
    }

    /// Run every matching callback for the input's event and fold the outputs.
    pub async fn dispatch(&self, input: HookInput) -> HookOutcome {
        let event = input.event;
        let mut fold = HookFold::default();
        let mut failures = Vec::new();

        let Some(hooks) = self.events.get(&event) else {
            return HookOutcome {
                event,
                output: fold.finish(event),
                failures,
            };
        };

        let target = input.match_target().map(str::to_string);
        for group in &hooks.groups {
            if !group.matcher.matches(target.as_deref()) {
                continue;
            }
            for (callback, id) in group.matcher.callbacks.iter().zip(&group.ids) {
                let call = callback.call(input.clone());
                let result: std::result::Result<HookOutput, BoxError> = match group.matcher.timeout {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(result) => result,
                        Err(_) => Err(format!("timed out after {limit:?}").into()),
                    },
                    None => call.await,
                };
                match result {
                    Ok(output) => fold.absorb(output),
                    Err(e) => {
                        tracing::warn!(%event, callback = %id, error = %e, "hook callback failed");
                        failures.push(HookFailure {
                            event,
                            callback: *id,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        HookOutcome {
            event,
            output: fold.finish(event),
            failures,
        }
    }
}

impl fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.events.iter().map(|(event, hooks)| (event, &hooks.handle)))
            .finish()
    }
}

/// Accumulates callback outputs for one event.
///
/// - the first deny is final; later allows do not override it
/// - otherwise the last decision wins
/// - the last non-empty `updatedInput` wins
/// - system messages and additional context concatenate
/// - `continue: false` is sticky
#[derive(Debug, Default)]
pub(crate) struct HookFold {
    output: HookOutput,
    denied: bool,
    messages: Vec<String>,
    contexts: Vec<String>,
}

impl HookFold {
    pub(crate) fn absorb(&mut self, next: HookOutput) {
        if next.continue_ == Some(false) {
            if self.output.continue_ != Some(false) {
                self.output.stop_reason = next.stop_reason.clone();
            }
            self.output.continue_ = Some(false);
        } else if next.continue_ == Some(true) && self.output.continue_.is_none() {
            self.output.continue_ = Some(true);
        }

        if next.suppress_output == Some(true) {
            self.output.suppress_output = Some(true);
        }
        if let Some(message) = &next.system_message {
            self.messages.push(message.clone());
        }

        if !self.denied {
            if next.is_deny() {
                self.denied = true;
                let reason = next.deny_reason().map(str::to_string);
                self.output.decision = Some(HookDecision::Block);
                self.output.reason = reason.clone();
                self.output = std::mem::take(&mut self.output)
                    .with_permission(PermissionDecision::Deny, reason);
            } else {
                if next.decision.is_some() {
                    self.output.decision = next.decision;
                    self.output.reason = next.reason.clone();
                }
                if let Some(decision) = next.permission_decision() {
                    let reason = next
                        .hook_specific_output
                        .as_ref()
                        .and_then(|s| s.permission_decision_reason.clone());
                    self.output = std::mem::take(&mut self.output).with_permission(decision, reason);
                }
            }
        }

        if let Some(specific) = next.hook_specific_output {
            if let Some(input) = specific.updated_input.filter(is_non_empty) {
                self.output = std::mem::take(&mut self.output).with_updated_input(input);
            }
            if let Some(context) = specific.additional_context {
                self.contexts.push(context);
            }
        }
    }

    pub(crate) fn finish(mut self, event: HookEvent) -> HookOutput {
        if !self.messages.is_empty() {
            self.output.system_message = Some(self.messages.join("\n"));
        }
        if !self.contexts.is_empty() {
            self.output = self.output.with_additional_context(self.contexts.join("\n"));
        }
        if let Some(specific) = self.output.hook_specific_output.as_mut() {
            specific.hook_event_name = Some(event);
        }
        self.output
    }
}

fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Bounded record of hook failures for one query.
#[derive(Debug, Default)]
pub struct Diagnostics {
    failures: Mutex<VecDeque<HookFailure>>,
}

impl Diagnostics {
    pub fn record(&self, failure: HookFailure) {
        let Ok(mut failures) = self.failures.lock() else {
            return;
        };
        if failures.len() == MAX_DIAGNOSTICS {
            failures.pop_front();
        }
        failures.push_back(failure);
    }

    pub fn snapshot(&self) -> Vec<HookFailure> {
        self.failures
            .lock()
            .map(|failures| failures.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn pre_tool_use(tool: &str) -> HookInput {
        HookInput::new(
            HookEvent::PreToolUse,
            json!({"hook_event_name": "PreToolUse", "tool_name": tool, "tool_input": {}}),
            Some("toolu_1".into()),
        )
    }

    #[tokio::test]
    async fn deny_wins_over_later_allow() {
        let hooks = Hooks::new().on(
            HookEvent::PreToolUse,
            HookMatcher::all()
                .hook(|_input: HookInput| async { Ok::<_, BoxError>(HookOutput::deny("no")) })
                .hook(|_input: HookInput| async { Ok::<_, BoxError>(HookOutput::allow()) }),
        );
        let outcome = HookDispatcher::new(&hooks).dispatch(pre_tool_use("Bash")).await;
        assert!(outcome.output.is_deny());
        assert_eq!(outcome.output.deny_reason(), Some("no"));
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn last_updated_input_wins_and_messages_concatenate() {
        let hooks = Hooks::new()
            .on(
                HookEvent::PreToolUse,
                HookMatcher::all().hook(|_input: HookInput| async {
                    Ok::<_, BoxError>(HookOutput::empty()
                        .with_updated_input(json!({"v": 1}))
                        .with_system_message("first"))
                }),
            )
            .on(
                HookEvent::PreToolUse,
                HookMatcher::new("Bash").hook(|_input: HookInput| async {
                    Ok::<_, BoxError>(HookOutput::empty()
                        .with_updated_input(json!({"v": 2}))
                        .with_system_message("second")
                        .with_additional_context("ctx"))
                }),
            )
            .on(
                HookEvent::PreToolUse,
                HookMatcher::all().hook(|_input: HookInput| async {
                    Ok::<_, BoxError>(HookOutput::empty().with_updated_input(json!({})))
                }),
            );
        let outcome = HookDispatcher::new(&hooks).dispatch(pre_tool_use("Bash")).await;
        assert_eq!(outcome.output.updated_input(), Some(&json!({"v": 2})));
        assert_eq!(outcome.output.system_message.as_deref(), Some("first\nsecond"));
        let specific = outcome.output.hook_specific_output.unwrap();
        assert_eq!(specific.additional_context.as_deref(), Some("ctx"));
        assert_eq!(specific.hook_event_name, Some(HookEvent::PreToolUse));
    }

    #[tokio::test]
    async fn only_matching_groups_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hooks = Hooks::new().on(
            HookEvent::PreToolUse,
            HookMatcher::new("Read").hook(move |_input: HookInput| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(HookOutput::empty())
                }
            }),
        );
        let dispatcher = HookDispatcher::new(&hooks);
        dispatcher.dispatch(pre_tool_use("ReadFile")).await;
        dispatcher.dispatch(pre_tool_use("Write")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        dispatcher.dispatch(pre_tool_use("Read")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_and_slow_callbacks_count_as_empty() {
        let hooks = Hooks::new().on(
            HookEvent::PreToolUse,
            HookMatcher::all()
                .timeout(Duration::from_millis(20))
                .hook(|_input: HookInput| async { Err::<HookOutput, BoxError>("boom".into()) })
                .hook(|_input: HookInput| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, BoxError>(HookOutput::deny("too late"))
                })
                .hook(|_input: HookInput| async {
                    Ok::<_, BoxError>(HookOutput::empty().with_system_message("still here"))
                }),
        );
        let outcome = HookDispatcher::new(&hooks).dispatch(pre_tool_use("Bash")).await;
        assert!(!outcome.output.is_deny());
        assert_eq!(outcome.output.system_message.as_deref(), Some("still here"));
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].message, "boom");
        assert!(outcome.failures[1].message.contains("timed out"));
    }

    #[tokio::test]
    async fn continue_false_is_sticky() {
        let mut fold = HookFold::default();
        fold.absorb(HookOutput::stop("halt"));
        fold.absorb(HookOutput {
            continue_: Some(true),
            ..HookOutput::empty()
        });
        let output = fold.finish(HookEvent::Stop);
        assert_eq!(output.continue_, Some(false));
        assert_eq!(output.stop_reason.as_deref(), Some("halt"));
    }

    #[tokio::test]
    async fn handles_are_per_event() {
        let hooks = Hooks::new()
            .on(HookEvent::PreToolUse, HookMatcher::all().timeout(Duration::from_secs(3)))
            .on(HookEvent::PreToolUse, HookMatcher::new("Bash").timeout(Duration::from_secs(2)))
            .on(HookEvent::SessionStart, HookMatcher::all());
        let dispatcher = HookDispatcher::new(&hooks);
        let payload = dispatcher.initialize_payload().unwrap();

        let pre = dispatcher.handle_for(HookEvent::PreToolUse).unwrap();
        let start = dispatcher.handle_for(HookEvent::SessionStart).unwrap();
        assert_ne!(pre, start);
        assert_eq!(
            payload["PreToolUse"],
            json!([{"matcher": null, "hookCallbackIds": [pre], "timeout": 5}])
        );
        assert!(payload["SessionStart"][0].get("timeout").is_none());
        assert!(HookDispatcher::new(&Hooks::new()).initialize_payload().is_none());
    }

    #[tokio::test]
    async fn unknown_handle_is_an_error() {
        let dispatcher = HookDispatcher::new(&Hooks::new());
        let err = dispatcher.invoke("hook_9", json!({}), None).await.unwrap_err();
        assert!(matches!(err, Error::Callback { .. }));
    }

    #[test]
    fn diagnostics_are_bounded() {
        let diagnostics = Diagnostics::default();
        for i in 0..(MAX_DIAGNOSTICS as u64 + 3) {
            diagnostics.record(HookFailure {
                event: HookEvent::Stop,
                callback: CallbackId(i),
                message: String::new(),
            });
        }
        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.len(), MAX_DIAGNOSTICS);
        assert_eq!(snapshot[0].callback, CallbackId(3));
    }
}
