//! Event rule engine
//!
//! A rule is plain data: an identifier, a description, an ordered list of
//! predicates (each with the value it is expected to return and the message
//! reported when it does not) and an ordered list of actions. Predicates,
//! actions and the global hooks are all plain function pointers over a
//! caller-defined context, so one engine can drive any state machine.
//!
//! Processing a rule:
//!
//! ```text
//! predicates ──mismatch──▶ { valid: false, message }
//!     │ all match
//!     ▼
//! enter hook ──false──▶ { valid: true }
//!     │
//!     ▼
//! actions (stop at first false)
//!     │
//!     ▼
//! exit hook ──▶ { valid: true }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tracing::trace;

/// Message returned when no rule is registered under the requested id
pub const RULE_NOT_FOUND: &str = "Matching rule not found";

/// Predicate, action and hook signature
///
/// Predicates and hooks receive the rule being processed; actions receive
/// `None` since they are already bound to their rule.
pub type RuleFn<K, C> = fn(Option<&Rule<K, C>>, &mut C) -> bool;

/// Outcome of processing a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResponse {
    pub valid: bool,
    pub message: String,
}

impl RuleResponse {
    fn valid() -> Self {
        Self {
            valid: true,
            message: String::new(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

struct Predicate<K, C> {
    callback: RuleFn<K, C>,
    expected: bool,
    message: String,
}

/// A named rule
pub struct Rule<K, C> {
    name: K,
    description: String,
    predicates: Vec<Predicate<K, C>>,
    actions: Vec<RuleFn<K, C>>,
}

impl<K: Copy, C> Rule<K, C> {
    pub fn new(name: K, description: impl Into<String>) -> Self {
        Self {
            name,
            description: description.into(),
            predicates: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Append a predicate that must return `expected` for the rule to apply
    pub fn with_predicate(
        mut self,
        callback: RuleFn<K, C>,
        expected: bool,
        message: impl Into<String>,
    ) -> Self {
        self.predicates.push(Predicate {
            callback,
            expected,
            message: message.into(),
        });
        self
    }

    /// Append an action
    pub fn with_action(mut self, action: RuleFn<K, C>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn name(&self) -> K {
        self.name
    }

    fn run_predicates(&self, context: &mut C) -> RuleResponse {
        for predicate in &self.predicates {
            if (predicate.callback)(Some(self), context) != predicate.expected {
                return RuleResponse::invalid(predicate.message.clone());
            }
        }
        RuleResponse::valid()
    }

    fn run_actions(&self, context: &mut C) -> bool {
        self.actions.iter().all(|action| action(None, context))
    }
}

impl<K: fmt::Debug, C> fmt::Debug for Rule<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("predicates", &self.predicates.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Registry of rules plus global enter/exit hooks
pub struct RuleEngine<K, C> {
    rules: HashMap<K, Rule<K, C>>,
    enter: Option<RuleFn<K, C>>,
    exit: Option<RuleFn<K, C>>,
}

impl<K, C> Default for RuleEngine<K, C> {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
            enter: None,
            exit: None,
        }
    }
}

impl<K: Copy + Eq + Hash + fmt::Debug, C> RuleEngine<K, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Returns false if a rule with the same id exists.
    pub fn add_rule(&mut self, rule: Rule<K, C>) -> bool {
        if self.rules.contains_key(&rule.name) {
            return false;
        }
        self.rules.insert(rule.name, rule);
        true
    }

    /// Hook run after predicates pass and before any action
    pub fn on_enter_rule(&mut self, hook: RuleFn<K, C>) {
        self.enter = Some(hook);
    }

    /// Hook run after a rule's actions
    pub fn on_exit_rule(&mut self, hook: RuleFn<K, C>) {
        self.exit = Some(hook);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Process a rule against the context
    ///
    /// Validity reflects predicate outcomes only; what actions and hooks
    /// return never changes it.
    pub fn process_rule(&self, name: K, context: &mut C) -> RuleResponse {
        let Some(rule) = self.rules.get(&name) else {
            return RuleResponse::invalid(RULE_NOT_FOUND);
        };

        let response = rule.run_predicates(context);
        if !response.valid {
            trace!(rule = %rule.description, "Predicates failed");
            return response;
        }

        if let Some(enter) = self.enter {
            if !enter(Some(rule), context) {
                trace!(rule = %rule.description, "Enter hook prevents further processing");
                return response;
            }
        }

        if !rule.run_actions(context) {
            trace!(rule = %rule.description, "Action prevents further actions");
        }

        if let Some(exit) = self.exit {
            exit(Some(rule), context);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Name {
        Start,
        Stop,
        Missing,
    }

    #[derive(Default)]
    struct Ctx {
        log: Vec<&'static str>,
        allow: bool,
        enter_allows: bool,
        seen_rule: Option<Name>,
    }

    fn allowed(rule: Option<&Rule<Name, Ctx>>, ctx: &mut Ctx) -> bool {
        ctx.log.push("predicate");
        ctx.seen_rule = rule.map(Rule::name);
        ctx.allow
    }

    fn never(_: Option<&Rule<Name, Ctx>>, ctx: &mut Ctx) -> bool {
        ctx.log.push("never");
        false
    }

    fn first(rule: Option<&Rule<Name, Ctx>>, ctx: &mut Ctx) -> bool {
        assert!(rule.is_none());
        ctx.log.push("first");
        true
    }

    fn halt(_: Option<&Rule<Name, Ctx>>, ctx: &mut Ctx) -> bool {
        ctx.log.push("halt");
        false
    }

    fn second(_: Option<&Rule<Name, Ctx>>, ctx: &mut Ctx) -> bool {
        ctx.log.push("second");
        true
    }

    fn enter(rule: Option<&Rule<Name, Ctx>>, ctx: &mut Ctx) -> bool {
        assert!(rule.is_some());
        ctx.log.push("enter");
        ctx.enter_allows
    }

    fn exit(rule: Option<&Rule<Name, Ctx>>, ctx: &mut Ctx) -> bool {
        assert!(rule.is_some());
        ctx.log.push("exit");
        true
    }

    fn engine() -> RuleEngine<Name, Ctx> {
        let mut engine = RuleEngine::new();
        engine.on_enter_rule(enter);
        engine.on_exit_rule(exit);
        engine.add_rule(
            Rule::new(Name::Start, "start")
                .with_predicate(allowed, true, "not allowed")
                .with_predicate(never, false, "never fails")
                .with_action(first)
                .with_action(second),
        );
        engine.add_rule(
            Rule::new(Name::Stop, "stop")
                .with_action(first)
                .with_action(halt)
                .with_action(second),
        );
        engine
    }

    #[test]
    fn test_unknown_rule() {
        let mut ctx = Ctx::default();
        let response = engine().process_rule(Name::Missing, &mut ctx);
        assert!(!response.valid);
        assert_eq!(response.message, RULE_NOT_FOUND);
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn test_full_pipeline() {
        let mut ctx = Ctx {
            allow: true,
            enter_allows: true,
            ..Default::default()
        };
        let response = engine().process_rule(Name::Start, &mut ctx);
        assert!(response.valid);
        assert_eq!(ctx.log, vec!["predicate", "never", "enter", "first", "second", "exit"]);
        assert_eq!(ctx.seen_rule, Some(Name::Start));
    }

    #[test]
    fn test_predicate_failure_short_circuits() {
        let mut ctx = Ctx {
            allow: false,
            enter_allows: true,
            ..Default::default()
        };
        let response = engine().process_rule(Name::Start, &mut ctx);
        assert!(!response.valid);
        assert_eq!(response.message, "not allowed");
        assert_eq!(ctx.log, vec!["predicate"]);
    }

    #[test]
    fn test_enter_hook_stops_pipeline() {
        let mut ctx = Ctx {
            allow: true,
            enter_allows: false,
            ..Default::default()
        };
        let response = engine().process_rule(Name::Start, &mut ctx);
        assert!(response.valid);
        assert_eq!(ctx.log, vec!["predicate", "never", "enter"]);
    }

    #[test]
    fn test_failing_action_skips_rest_but_runs_exit() {
        let mut ctx = Ctx {
            enter_allows: true,
            ..Default::default()
        };
        let response = engine().process_rule(Name::Stop, &mut ctx);
        assert!(response.valid);
        assert_eq!(ctx.log, vec!["enter", "first", "halt", "exit"]);
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut engine = engine();
        assert_eq!(engine.len(), 2);
        assert!(!engine.add_rule(Rule::new(Name::Stop, "again")));
        assert_eq!(engine.len(), 2);
    }
}
