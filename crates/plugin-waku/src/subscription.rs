//! Active subscriptions of one node.
//!
//! Relay subscriptions are reference counted per pubsub topic: the library
//! is subscribed once, when the first subscription for a topic is added,
//! and unsubscribed when the last one goes. Filter subscriptions are
//! forwarded to the library individually and may not be duplicated.
//!
//! The subscription whose `add` triggered the library call anchors that
//! library subscription. If the library later fails the call, revoking the
//! anchor drops every entry that relied on it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use modhost_core::error::{AppError, AppResult};
use modhost_core::types::{ContentFilter, SubscriptionId};

/// Which Waku protocol carries a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Relay,
    Filter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: String,
    pub filter: Option<ContentFilter>,
    pub protocol: Protocol,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, topic: &str, content_topic: &str) -> bool {
        self.topic == topic
            && self
                .filter
                .as_ref()
                .is_none_or(|filter| filter.matches(content_topic))
    }
}

/// The library call an added or removed subscription requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryAction {
    None,
    RelaySubscribe,
    RelayUnsubscribe,
    FilterSubscribe,
}

/// Library-side relay subscription of one topic.
#[derive(Debug, Clone, Copy)]
struct RelayTopic {
    refs: usize,
    anchor: SubscriptionId,
}

#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: HashMap<SubscriptionId, Subscription>,
    relay_topics: HashMap<String, RelayTopic>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a subscription and returns it with the library call needed
    /// to make it effective.
    ///
    /// A `None` or empty filter is a relay subscription.
    pub fn add(
        &mut self,
        topic: &str,
        filter: Option<ContentFilter>,
    ) -> AppResult<(Subscription, LibraryAction)> {
        let filter = filter.filter(|f| !f.content_topics.is_empty());
        let protocol = if filter.is_some() {
            Protocol::Filter
        } else {
            Protocol::Relay
        };

        if protocol == Protocol::Filter
            && self
                .entries
                .values()
                .any(|s| s.protocol == Protocol::Filter && s.topic == topic && s.filter == filter)
        {
            return Err(AppError::duplicate_subscription(format!(
                "An identical filter subscription on '{topic}' already exists"
            )));
        }

        let id = SubscriptionId::new();
        let subscription = Subscription {
            id,
            topic: topic.to_string(),
            filter,
            protocol,
            created_at: Utc::now(),
        };

        let action = match protocol {
            Protocol::Filter => LibraryAction::FilterSubscribe,
            Protocol::Relay => match self.relay_topics.get_mut(topic) {
                Some(relay) => {
                    relay.refs += 1;
                    LibraryAction::None
                }
                None => {
                    self.relay_topics
                        .insert(topic.to_string(), RelayTopic { refs: 1, anchor: id });
                    LibraryAction::RelaySubscribe
                }
            },
        };

        self.entries.insert(subscription.id, subscription.clone());
        Ok((subscription, action))
    }

    /// Drops a subscription and returns it with the library call needed to
    /// withdraw it.
    pub fn remove(&mut self, id: SubscriptionId) -> AppResult<(Subscription, LibraryAction)> {
        let subscription = self
            .entries
            .remove(&id)
            .ok_or_else(|| AppError::subscription_not_found(format!("No subscription {id}")))?;

        let action = match subscription.protocol {
            // No filter unsubscribe entry point is bound; the entry simply
            // stops matching.
            Protocol::Filter => LibraryAction::None,
            Protocol::Relay => self.release_relay(&subscription.topic),
        };
        Ok((subscription, action))
    }

    fn release_relay(&mut self, topic: &str) -> LibraryAction {
        match self.relay_topics.get_mut(topic) {
            Some(relay) if relay.refs > 1 => {
                relay.refs -= 1;
                LibraryAction::None
            }
            Some(_) => {
                self.relay_topics.remove(topic);
                LibraryAction::RelayUnsubscribe
            }
            None => LibraryAction::None,
        }
    }

    /// Puts back a subscription taken out by [`remove`](Self::remove) whose
    /// library withdrawal was refused.
    pub fn restore(&mut self, subscription: Subscription) {
        if subscription.protocol == Protocol::Relay {
            self.relay_topics
                .entry(subscription.topic.clone())
                .and_modify(|relay| relay.refs += 1)
                .or_insert(RelayTopic {
                    refs: 1,
                    anchor: subscription.id,
                });
        }
        self.entries.insert(subscription.id, subscription);
    }

    /// Drops what depended on a library subscription the library failed.
    ///
    /// `anchor` is the subscription whose `add` issued the library call. For
    /// a relay topic still anchored by it, every relay entry on the topic is
    /// dropped; for a filter subscription only the entry itself. Returns the
    /// dropped ids, empty if the call was superseded in the meantime.
    pub fn revoke(&mut self, anchor: SubscriptionId) -> Vec<SubscriptionId> {
        let relay_topic = self
            .relay_topics
            .iter()
            .find(|(_, relay)| relay.anchor == anchor)
            .map(|(topic, _)| topic.clone());

        if let Some(topic) = relay_topic {
            self.relay_topics.remove(&topic);
            let dropped: Vec<SubscriptionId> = self
                .entries
                .values()
                .filter(|s| s.protocol == Protocol::Relay && s.topic == topic)
                .map(|s| s.id)
                .collect();
            for id in &dropped {
                self.entries.remove(id);
            }
            return dropped;
        }

        match self.entries.get(&anchor) {
            Some(s) if s.protocol == Protocol::Filter => {
                self.entries.remove(&anchor);
                vec![anchor]
            }
            _ => Vec::new(),
        }
    }

    /// Drops every subscription. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        self.relay_topics.clear();
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Whether any subscription wants a message on `topic` with `content_topic`.
    pub fn matches(&self, topic: &str, content_topic: &str) -> bool {
        self.entries
            .values()
            .any(|s| s.matches(topic, content_topic))
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.entries.get(&id)
    }

    pub fn relay_refs(&self, topic: &str) -> usize {
        self.relay_topics.get(topic).map(|relay| relay.refs).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_core::error::ErrorKind;

    const TOPIC: &str = "/waku/2/rs/0/0";

    #[test]
    fn test_relay_duplicates_are_reference_counted() {
        let mut table = SubscriptionTable::new();
        let (first, a1) = table.add(TOPIC, None).unwrap();
        let (second, a2) = table.add(TOPIC, None).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(a1, LibraryAction::RelaySubscribe);
        assert_eq!(a2, LibraryAction::None);
        assert_eq!(table.relay_refs(TOPIC), 2);

        assert_eq!(table.remove(first.id).unwrap().1, LibraryAction::None);
        assert_eq!(table.remove(second.id).unwrap().1, LibraryAction::RelayUnsubscribe);
        assert!(table.is_empty());
    }

    #[test]
    fn test_identical_filter_is_rejected() {
        let mut table = SubscriptionTable::new();
        let filter = ContentFilter::new(["/app/1/chat/proto"]);
        let (_, action) = table.add(TOPIC, Some(filter.clone())).unwrap();
        assert_eq!(action, LibraryAction::FilterSubscribe);

        let err = table.add(TOPIC, Some(filter)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSubscription);

        // A different content topic set is a different subscription.
        assert!(table.add(TOPIC, Some(ContentFilter::new(["/app/1/other/proto"]))).is_ok());
    }

    #[test]
    fn test_empty_filter_is_relay() {
        let mut table = SubscriptionTable::new();
        let (sub, action) = table.add(TOPIC, Some(ContentFilter::default())).unwrap();
        assert_eq!(sub.protocol, Protocol::Relay);
        assert_eq!(action, LibraryAction::RelaySubscribe);
    }

    #[test]
    fn test_matching_respects_filters() {
        let mut table = SubscriptionTable::new();
        table.add(TOPIC, Some(ContentFilter::new(["a"]))).unwrap();

        assert!(table.matches(TOPIC, "a"));
        assert!(!table.matches(TOPIC, "b"));
        assert!(!table.matches("/other", "a"));

        table.add(TOPIC, None).unwrap();
        assert!(table.matches(TOPIC, "b"));
    }

    #[test]
    fn test_remove_unknown_subscription() {
        let mut table = SubscriptionTable::new();
        let err = table.remove(SubscriptionId::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SubscriptionNotFound);
    }

    #[test]
    fn test_revoking_anchor_drops_dependent_relay_entries() {
        let mut table = SubscriptionTable::new();
        let (anchor, _) = table.add(TOPIC, None).unwrap();
        table.add(TOPIC, None).unwrap();
        let (other, _) = table.add("/waku/2/rs/0/1", None).unwrap();

        assert_eq!(table.revoke(anchor.id).len(), 2);
        assert_eq!(table.relay_refs(TOPIC), 0);
        assert!(table.get(other.id).is_some());
        assert_eq!(table.add(TOPIC, None).unwrap().1, LibraryAction::RelaySubscribe);
    }

    #[test]
    fn test_revoke_ignores_superseded_library_call() {
        let mut table = SubscriptionTable::new();
        let (first, _) = table.add(TOPIC, None).unwrap();
        assert_eq!(table.remove(first.id).unwrap().1, LibraryAction::RelayUnsubscribe);
        let (second, action) = table.add(TOPIC, None).unwrap();
        assert_eq!(action, LibraryAction::RelaySubscribe);

        // The first call failing late must not touch the second one.
        assert!(table.revoke(first.id).is_empty());
        assert!(table.get(second.id).is_some());
        assert_eq!(table.relay_refs(TOPIC), 1);
    }

    #[test]
    fn test_revoke_filter_subscription() {
        let mut table = SubscriptionTable::new();
        let filter = ContentFilter::new(["/app/1/chat/proto"]);
        let (sub, _) = table.add(TOPIC, Some(filter.clone())).unwrap();

        assert_eq!(table.revoke(sub.id), vec![sub.id]);
        assert!(table.add(TOPIC, Some(filter)).is_ok());
    }

    #[test]
    fn test_restore_after_refused_withdrawal() {
        let mut table = SubscriptionTable::new();
        let (sub, _) = table.add(TOPIC, None).unwrap();
        let (removed, action) = table.remove(sub.id).unwrap();
        assert_eq!(action, LibraryAction::RelayUnsubscribe);

        table.restore(removed);
        assert_eq!(table.relay_refs(TOPIC), 1);
        assert!(table.get(sub.id).is_some());
        assert_eq!(table.add(TOPIC, None).unwrap().1, LibraryAction::None);
    }

    #[test]
    fn test_clear_resets_reference_counts() {
        let mut table = SubscriptionTable::new();
        table.add(TOPIC, None).unwrap();
        table.add(TOPIC, None).unwrap();
        assert_eq!(table.clear(), 2);
        assert_eq!(table.relay_refs(TOPIC), 0);
        assert_eq!(table.add(TOPIC, None).unwrap().1, LibraryAction::RelaySubscribe);
    }
}
