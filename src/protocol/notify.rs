//! Grouping of fired subscription keys by root field name, coalesced at the
//! server level before a delivery sweep (§4.5).

use std::collections::HashSet;

use crate::schema::SubscriptionKey;

/// The set of subscription keys eligible to deliver during one execution of
/// `schema.deliver(name, ..)`, grouped under the root field `name` they
/// belong to. Only *merge* combines two triggers for the same name — the
/// set union of their keys.
#[derive(Debug, Clone)]
pub struct NotifyTriggers {
    pub name: String,
    pub keys: HashSet<SubscriptionKey>,
}

impl NotifyTriggers {
    pub fn new(name: impl Into<String>, keys: impl IntoIterator<Item = SubscriptionKey>) -> Self {
        Self {
            name: name.into(),
            keys: keys.into_iter().collect(),
        }
    }

    pub fn merge(&mut self, other: &NotifyTriggers) {
        debug_assert_eq!(self.name, other.name, "merging triggers for different fields");
        self.keys.extend(other.keys.iter().copied());
    }

    pub fn has_subscription_key(&self, key: SubscriptionKey) -> bool {
        self.keys.contains(&key)
    }
}
