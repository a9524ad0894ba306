//! Ordered rule table for MIDI dispatch.
//!
//! A [`Dispatcher`] holds `(matcher, actions)` rules in registration order.
//! Every dispatch pass evaluates every rule: several rules may react to the
//! same message, and none of them stops the pass. Rules see the mutations
//! earlier rules made to the message, so an action that wants to defer to
//! an earlier one checks [`Message::handled`] itself.
//!
//! A failing action (an `Err` or a panic) is logged and skipped; sibling
//! actions and later rules still run.

use std::panic::{self, AssertUnwindSafe};

use crate::matchers::Matcher;
use crate::message::Message;

/// A rule action. `S` is the state the rules operate on.
pub type Action<S> = Box<dyn FnMut(&mut S, &mut Message) -> anyhow::Result<()>>;

/// Box a closure as an [`Action`].
pub fn action<S, F>(f: F) -> Action<S>
where
    F: FnMut(&mut S, &mut Message) -> anyhow::Result<()> + 'static,
{
    Box::new(f)
}

/// One registered rule.
pub struct Rule<S> {
    matcher: Matcher,
    actions: Vec<Action<S>>,
}

impl<S> Rule<S> {
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}

/// Outcome of one dispatch pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Indices of the rules whose matcher accepted the message, in order.
    pub matched_rules: Vec<usize>,
    /// `(rule index, action index)` of every action that failed.
    pub failed_actions: Vec<(usize, usize)>,
}

impl DispatchReport {
    pub fn matched(&self) -> bool {
        !self.matched_rules.is_empty()
    }
}

/// Ordered rule table.
pub struct Dispatcher<S> {
    rules: Vec<Rule<S>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Dispatcher<S> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule. Returns its index, which is also its firing position.
    pub fn register(
        &mut self,
        matcher: impl Into<Matcher>,
        actions: impl IntoIterator<Item = Action<S>>,
    ) -> usize {
        self.rules.push(Rule {
            matcher: matcher.into(),
            actions: actions.into_iter().collect(),
        });
        self.rules.len() - 1
    }

    /// Start a rule fluently: `dispatcher.when(m).then(a).then(b);`
    pub fn when(&mut self, matcher: impl Into<Matcher>) -> RuleBuilder<'_, S> {
        let index = self.register(matcher, Vec::new());
        RuleBuilder {
            rule: &mut self.rules[index],
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule<S>] {
        &self.rules
    }

    /// Remove every rule.
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Run one dispatch pass.
    pub fn dispatch(&mut self, state: &mut S, msg: &mut Message) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (rule_index, rule) in self.rules.iter_mut().enumerate() {
            if !rule.matcher.matches(msg) {
                continue;
            }
            report.matched_rules.push(rule_index);

            for (action_index, act) in rule.actions.iter_mut().enumerate() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| act(&mut *state, &mut *msg)));
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(payload) => Some(panic_message(payload.as_ref())),
                };
                if let Some(reason) = failure {
                    log::warn!(
                        "[DISPATCH] Rule {} action {} failed on {}: {}",
                        rule_index,
                        action_index,
                        msg,
                        reason
                    );
                    report.failed_actions.push((rule_index, action_index));
                }
            }
        }

        report
    }
}

/// Fluent handle to the rule created by [`Dispatcher::when`].
pub struct RuleBuilder<'a, S> {
    rule: &'a mut Rule<S>,
}

impl<S> RuleBuilder<'_, S> {
    /// Append an action to the rule.
    pub fn then<F>(self, f: F) -> Self
    where
        F: FnMut(&mut S, &mut Message) -> anyhow::Result<()> + 'static,
    {
        self.rule.actions.push(Box::new(f));
        self
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{equals, in_range, Field, MidiHas};

    /// Records which (rule, action) ran, in order.
    type Trace = Vec<&'static str>;

    fn push(tag: &'static str) -> Action<Trace> {
        action(move |trace: &mut Trace, _msg: &mut Message| {
            trace.push(tag);
            Ok(())
        })
    }

    #[test]
    fn test_all_matching_rules_fire_in_order() {
        let mut d: Dispatcher<Trace> = Dispatcher::new();
        d.register(equals(Field::Status, 0x99), [push("r0a"), push("r0b")]);
        d.register(equals(Field::Status, 0x80), [push("r1")]);
        d.register(in_range(Field::Data1, 0x28, 0x33), [push("r2")]);

        let mut trace = Trace::new();
        let report = d.dispatch(&mut trace, &mut Message::new(0x99, 0x28, 0x7F));

        assert_eq!(trace, vec!["r0a", "r0b", "r2"]);
        assert_eq!(report.matched_rules, vec![0, 2]);
        assert!(report.failed_actions.is_empty());
    }

    #[test]
    fn test_no_match() {
        let mut d: Dispatcher<Trace> = Dispatcher::new();
        d.register(equals(Field::Status, 0x99), [push("r0")]);
        let mut trace = Trace::new();
        let report = d.dispatch(&mut trace, &mut Message::new(0x90, 0, 0));
        assert!(!report.matched());
        assert!(trace.is_empty());
    }

    #[test]
    fn test_handled_does_not_short_circuit() {
        let mut d: Dispatcher<Trace> = Dispatcher::new();
        d.when(Matcher::any()).then(|trace: &mut Trace, msg: &mut Message| {
            msg.mark_handled();
            trace.push("marker");
            Ok(())
        });
        d.when(Matcher::any()).then(|trace: &mut Trace, msg: &mut Message| {
            trace.push(if msg.handled { "saw handled" } else { "saw fresh" });
            Ok(())
        });

        let mut trace = Trace::new();
        let mut msg = Message::new(0xB0, 0x75, 0x7F);
        d.dispatch(&mut trace, &mut msg);
        assert_eq!(trace, vec!["marker", "saw handled"]);
        assert!(msg.is_handled());
    }

    #[test]
    fn test_failures_are_isolated() {
        let mut d: Dispatcher<Trace> = Dispatcher::new();
        d.when(Matcher::any())
            .then(|_: &mut Trace, _: &mut Message| anyhow::bail!("boom"))
            .then(|trace: &mut Trace, _: &mut Message| {
                trace.push("sibling");
                Ok(())
            });
        d.when(Matcher::any())
            .then(|_: &mut Trace, _: &mut Message| panic!("kaboom"));
        d.register(Matcher::any(), [push("later")]);

        let mut trace = Trace::new();
        let report = d.dispatch(&mut trace, &mut Message::new(0x90, 60, 100));

        assert_eq!(trace, vec!["sibling", "later"]);
        assert_eq!(report.failed_actions, vec![(0, 0), (1, 0)]);
        assert_eq!(report.matched_rules, vec![0, 1, 2]);
    }

    #[test]
    fn test_builder_and_clear() {
        let mut d: Dispatcher<Trace> = Dispatcher::new();
        assert!(d.is_empty());
        d.register(MidiHas::new().status(0x99), [push("a"), push("b")]);
        assert_eq!(d.len(), 1);
        assert_eq!(d.rules()[0].action_count(), 2);
        d.clear();
        assert!(d.is_empty());
    }

    #[test]
    fn test_example_capture_rule() {
        // status == 0x99 and data1 in [0x28..0x33]
        let pad = equals(Field::Status, 0x99).and(in_range(Field::Data1, 0x28, 0x33));
        let mut d: Dispatcher<Vec<u8>> = Dispatcher::new();
        d.when(pad).then(|seen: &mut Vec<u8>, msg: &mut Message| {
            seen.push(msg.data1);
            Ok(())
        });

        let mut seen = Vec::new();
        for (status, data1) in [(0x99, 0x28), (0x89, 0x28), (0x99, 0x29), (0x99, 0x40)] {
            d.dispatch(&mut seen, &mut Message::new(status, data1, 0x7F));
        }
        assert_eq!(seen, vec![0x28, 0x29]);
    }
}
