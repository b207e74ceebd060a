//! Host-side event bus used for out-of-band row delivery.
//!
//! A [`ChannelEngine`](crate::native::ChannelEngine) emits rows on a channel
//! named by a [`ChannelToken`]. Whoever subscribed to that token receives them
//! in emission order. Subscriptions are guards: dropping a [`Subscription`]
//! removes it, so a subscription cannot outlive the call that created it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::value::Row;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Name of one row channel. Unique for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelToken(Arc<str>);

impl ChannelToken {
    /// Allocate a fresh token.
    #[must_use]
    pub fn next() -> Self {
        let n = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        Self(Arc::from(format!("sqlite3-row-{n}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Handler = Box<dyn FnMut(Row) + Send>;
type SharedHandler = Arc<Mutex<Handler>>;

/// Registry of named row subscriptions. Clones share the registry.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<ChannelToken, SharedHandler>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route rows emitted on `token` to `handler` until the returned guard is released.
    pub fn subscribe<F>(&self, token: ChannelToken, handler: F) -> Subscription
    where
        F: FnMut(Row) + Send + 'static,
    {
        let handler: SharedHandler = Arc::new(Mutex::new(Box::new(handler)));
        if self
            .handlers
            .lock()
            .insert(token.clone(), handler)
            .is_some()
        {
            tracing::warn!(channel = %token, "replaced an existing row subscription");
        }
        tracing::trace!(channel = %token, "row channel subscribed");

        Subscription {
            bus: self.clone(),
            token,
            active: true,
        }
    }

    /// Deliver `row` to the subscriber of `token`.
    ///
    /// Returns false when nobody is subscribed. A panicking handler is
    /// contained here and logged.
    ///
    /// Rows for one token are delivered one at a time under that
    /// subscription's lock, so a handler must not emit on its own token; it
    /// would deadlock. Emitting on other tokens, subscribing and
    /// unsubscribing from inside a handler are fine.
    pub fn emit(&self, token: &ChannelToken, row: Row) -> bool {
        let handler = self.handlers.lock().get(token).cloned();
        let Some(handler) = handler else {
            tracing::debug!(channel = %token, "row emitted with no subscriber");
            return false;
        };

        let mut handler = handler.lock();
        if catch_unwind(AssertUnwindSafe(|| (*handler)(row))).is_err() {
            tracing::warn!(channel = %token, "row callback panicked; continuing delivery");
        }
        true
    }

    #[must_use]
    pub fn is_subscribed(&self, token: &ChannelToken) -> bool {
        self.handlers.lock().contains_key(token)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }

    fn remove(&self, token: &ChannelToken) {
        self.handlers.lock().remove(token);
        tracing::trace!(channel = %token, "row channel unsubscribed");
    }
}

/// Active subscription on an [`EventBus`].
///
/// Released by [`Subscription::unsubscribe`] or on drop, whichever comes first.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    bus: EventBus,
    token: ChannelToken,
    active: bool,
}

impl Subscription {
    #[must_use]
    pub const fn token(&self) -> &ChannelToken {
        &self.token
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.active) {
            self.bus.remove(&self.token);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(id: i64) -> Row {
        [("id", Value::from(id))].into_iter().collect()
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = ChannelToken::next();
        let b = ChannelToken::next();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sqlite3-row-"));
    }

    #[test]
    fn test_emit_delivers_in_order() {
        let bus = EventBus::new();
        let token = ChannelToken::next();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let sub = bus.subscribe(token.clone(), move |row| sink.lock().push(row));

        assert!(bus.emit(&token, row(1)));
        assert!(bus.emit(&token, row(2)));
        sub.unsubscribe();

        assert_eq!(*seen.lock(), vec![row(1), row(2)]);
    }

    #[test]
    fn test_emit_without_subscriber() {
        let bus = EventBus::new();
        assert!(!bus.emit(&ChannelToken::next(), row(1)));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let token = ChannelToken::next();
        {
            let _sub = bus.subscribe(token.clone(), |_| {});
            assert!(bus.is_subscribed(&token));
        }
        assert!(!bus.is_subscribed(&token));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_releases_once() {
        let bus = EventBus::new();
        let token = ChannelToken::next();

        let first = bus.subscribe(token.clone(), |_| {});
        first.unsubscribe();

        // The consumed guard must not remove a later subscription on the same name.
        let _second = bus.subscribe(token.clone(), |_| {});
        assert!(bus.is_subscribed(&token));
    }

    #[test]
    fn test_handler_may_emit_on_another_token() {
        let bus = EventBus::new();
        let outer = ChannelToken::next();
        let inner = ChannelToken::next();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _inner_sub = bus.subscribe(inner.clone(), move |row| sink.lock().push(row));
        let relay = bus.clone();
        let target = inner.clone();
        let _outer_sub = bus.subscribe(outer.clone(), move |row| {
            let _nested = relay.subscribe(ChannelToken::next(), |_| {});
            assert!(relay.emit(&target, row));
        });

        assert!(bus.emit(&outer, row(7)));
        assert_eq!(*seen.lock(), vec![row(7)]);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let bus = EventBus::new();
        let token = ChannelToken::next();
        let count = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&count);
        let _sub = bus.subscribe(token.clone(), move |row| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_ne!(row.get("id"), Some(&Value::Integer(1)), "bad row");
        });

        assert!(bus.emit(&token, row(1)));
        assert!(bus.emit(&token, row(2)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
