use crate::transport::SubscriberHandle;

/// Per-topic subscription state. At most one subscriber per topic; a new subscribe replaces
/// the previous handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Subscription {
    #[default]
    Unsubscribed,
    Subscribed(SubscriberHandle),
}

impl Subscription {
    /// Returns the handle that was replaced, if any.
    pub fn subscribe(&mut self, handle: SubscriberHandle) -> Option<SubscriberHandle> {
        match std::mem::replace(self, Subscription::Subscribed(handle)) {
            Subscription::Subscribed(previous) => Some(previous),
            Subscription::Unsubscribed => None,
        }
    }

    /// Returns true when a subscriber was dropped.
    pub fn unsubscribe(&mut self) -> bool {
        matches!(std::mem::take(self), Subscription::Subscribed(_))
    }

    pub fn handle(&self) -> Option<&SubscriberHandle> {
        match self {
            Subscription::Subscribed(handle) => Some(handle),
            Subscription::Unsubscribed => None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.handle().is_some()
    }
}
