use crate::event::EventKind;
use std::collections::HashSet;

/// Per-connection delivery filter.
///
/// A connection that never subscribed is `Unfiltered` and receives every
/// event. The first `subscribe` switches it to an allowlist; from then on
/// only exact types, exact categories, or the `*` wildcard are delivered. An
/// allowlist emptied by `unsubscribe` stays an allowlist and matches nothing,
/// which is a different thing from never having subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionFilter {
    #[default]
    Unfiltered,
    Allowlist(HashSet<String>),
}

impl SubscriptionFilter {
    pub fn subscribe<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = String>,
    {
        if matches!(self, SubscriptionFilter::Unfiltered) {
            *self = SubscriptionFilter::Allowlist(HashSet::new());
        }
        if let SubscriptionFilter::Allowlist(set) = self {
            set.extend(events);
        }
    }

    pub fn unsubscribe<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        if let SubscriptionFilter::Allowlist(set) = self {
            for event in events {
                set.remove(event);
            }
        }
    }

    pub fn matches(&self, kind: &EventKind) -> bool {
        match self {
            SubscriptionFilter::Unfiltered => true,
            SubscriptionFilter::Allowlist(set) => {
                set.contains("*") || set.contains(kind.as_str()) || set.contains(kind.category())
            }
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        matches!(self, SubscriptionFilter::Unfiltered)
    }

    /// Current allowlist entries, sorted for stable confirmation replies.
    pub fn entries(&self) -> Vec<String> {
        match self {
            SubscriptionFilter::Unfiltered => Vec::new(),
            SubscriptionFilter::Allowlist(set) => {
                let mut entries: Vec<String> = set.iter().cloned().collect();
                entries.sort();
                entries
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(raw: &str) -> EventKind {
        EventKind::parse(raw)
    }

    #[test]
    fn unfiltered_receives_everything() {
        let filter = SubscriptionFilter::default();
        assert!(filter.matches(&kind("task:completed")));
        assert!(filter.matches(&kind("whatever:else")));
    }

    #[test]
    fn exact_type_match() {
        let mut filter = SubscriptionFilter::default();
        filter.subscribe(["task:completed".to_string()]);
        assert!(filter.matches(&kind("task:completed")));
        assert!(!filter.matches(&kind("task:created")));
    }

    #[test]
    fn category_match_uses_first_colon_segment() {
        let mut filter = SubscriptionFilter::default();
        filter.subscribe(["task".to_string()]);
        assert!(filter.matches(&kind("task:completed")));
        assert!(filter.matches(&kind("task:assigned")));
        assert!(!filter.matches(&kind("lead:added")));
        // "a:b" is not a prefix match against "a:b:c"
        filter.subscribe(["agent:pie".to_string()]);
        assert!(!filter.matches(&kind("agent:pie:feed")));
    }

    #[test]
    fn wildcard_matches_everything() {
        let mut filter = SubscriptionFilter::default();
        filter.subscribe(["*".to_string()]);
        assert!(filter.matches(&kind("task:completed")));
        assert!(filter.matches(&kind("custom:thing")));
    }

    #[test]
    fn emptied_allowlist_matches_nothing() {
        let mut filter = SubscriptionFilter::default();
        filter.subscribe(["task".to_string()]);
        filter.unsubscribe(["task"]);
        assert_eq!(filter, SubscriptionFilter::Allowlist(Default::default()));
        assert!(!filter.matches(&kind("task:completed")));
        assert!(!filter.is_unfiltered());
    }

    #[test]
    fn unsubscribe_before_any_subscribe_is_a_noop() {
        let mut filter = SubscriptionFilter::default();
        filter.unsubscribe(["task"]);
        assert!(filter.is_unfiltered());
        assert!(filter.matches(&kind("task:completed")));
    }

    #[test]
    fn entries_are_sorted() {
        let mut filter = SubscriptionFilter::default();
        filter.subscribe(["token".to_string(), "agent".to_string(), "task".to_string()]);
        assert_eq!(filter.entries(), vec!["agent", "task", "token"]);
    }
}
