//! Matcher groups and the hook registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use super::types::{HookCallback, HookEvent};

/// A group of callbacks that run when the matcher accepts the event.
///
/// A matcher is absent (match everything), an exact name (`"Bash"`), or an
/// alternation/regex (`"Edit|Write"`, `"mcp__.*"`). Patterns are anchored, so
/// `"Read"` never matches `"ReadFile"`.
#[derive(Clone, Default)]
pub struct HookMatcher {
    pattern: Option<String>,
    regex: Option<Regex>,
    pub(crate) callbacks: Vec<Arc<dyn HookCallback>>,
    pub(crate) timeout: Option<Duration>,
}

impl HookMatcher {
    /// Match every occurrence of the event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match targets against a pattern. `""` and `"*"` match everything.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if pattern.is_empty() || pattern == "*" {
            return Self::all();
        }
        let regex = match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "hook matcher is not a valid regex; matching names literally");
                None
            }
        };
        Self {
            pattern: Some(pattern),
            regex,
            callbacks: Vec::new(),
            timeout: None,
        }
    }

    /// Add a callback to the group.
    pub fn hook(mut self, callback: impl HookCallback + 'static) -> Self {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Bound each callback of the group by a deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Test a target. Events without a match target run every group.
    pub fn matches(&self, target: Option<&str>) -> bool {
        let (Some(pattern), Some(target)) = (self.pattern.as_deref(), target) else {
            return true;
        };
        match &self.regex {
            Some(regex) => regex.is_match(target),
            None => pattern.split('|').any(|name| name.trim() == target),
        }
    }
}

impl fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookMatcher")
            .field("pattern", &self.pattern)
            .field("callbacks", &self.callbacks.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Hook registrations for a query, grouped by event in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) groups: BTreeMap<HookEvent, Vec<HookMatcher>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a matcher group for an event.
    pub fn register(&mut self, event: HookEvent, matcher: HookMatcher) {
        self.groups.entry(event).or_default().push(matcher);
    }

    /// Chaining form of [`Hooks::register`].
    pub fn on(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.register(event, matcher);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(|groups| groups.is_empty())
    }

    /// Events with at least one group.
    pub fn events(&self) -> impl Iterator<Item = HookEvent> + '_ {
        self.groups
            .iter()
            .filter(|(_, groups)| !groups.is_empty())
            .map(|(event, _)| *event)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.groups.iter().map(|(event, groups)| (event, groups.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_matcher_matches_everything() {
        let matcher = HookMatcher::all();
        assert!(matcher.matches(Some("Bash")));
        assert!(matcher.matches(None));
        assert!(HookMatcher::new("*").matches(Some("anything")));
        assert!(HookMatcher::new("").pattern().is_none());
    }

    #[test]
    fn exact_name_is_anchored() {
        let matcher = HookMatcher::new("Read");
        assert!(matcher.matches(Some("Read")));
        assert!(!matcher.matches(Some("ReadFile")));
        assert!(!matcher.matches(Some("Write")));
    }

    #[test]
    fn alternation_and_regex() {
        let matcher = HookMatcher::new("Edit|Write");
        assert!(matcher.matches(Some("Edit")));
        assert!(matcher.matches(Some("Write")));
        assert!(!matcher.matches(Some("Read")));

        let matcher = HookMatcher::new("mcp__calc__.*");
        assert!(matcher.matches(Some("mcp__calc__add")));
        assert!(!matcher.matches(Some("mcp__db__query")));
    }

    #[test]
    fn invalid_regex_falls_back_to_names() {
        let matcher = HookMatcher::new("Bash(|Read");
        assert!(matcher.matches(Some("Read")));
        assert!(!matcher.matches(Some("Write")));
    }

    #[test]
    fn registry_preserves_order() {
        let hooks = Hooks::new()
            .on(HookEvent::PreToolUse, HookMatcher::new("Bash"))
            .on(HookEvent::PreToolUse, HookMatcher::all())
            .on(HookEvent::Stop, HookMatcher::all());
        let groups = &hooks.groups[&HookEvent::PreToolUse];
        assert_eq!(groups[0].pattern(), Some("Bash"));
        assert_eq!(groups[1].pattern(), None);
        assert_eq!(
            hooks.events().collect::<Vec<_>>(),
            vec![HookEvent::PreToolUse, HookEvent::Stop]
        );
        assert!(!hooks.is_empty());
        assert!(Hooks::new().is_empty());
    }
}
