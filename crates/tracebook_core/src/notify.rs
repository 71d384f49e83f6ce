//! Synchronous multi-subscriber notification channel.
//!
//! # Responsibility
//! - Deliver change payloads to every current subscriber, in subscribe order.
//! - Hand out stable subscription ids so owners can detach handlers later.
//!
//! # Invariants
//! - Delivery is synchronous: `publish` returns after every handler ran.
//! - Delivery iterates a snapshot of subscribers. Handlers may subscribe or
//!   unsubscribe while a publish is in flight; the change applies to the
//!   next publish.
//! - Cloning a `Channel` yields another handle to the same subscriber list.
//! - Single-threaded only (`Rc`-based, not `Send`).

use std::cell::RefCell;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

/// Opaque handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors from channel subscription management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Handler is not (or no longer) subscribed to this channel.
    SubscriptionNotFound(SubscriptionId),
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubscriptionNotFound(id) => write!(f, "subscription not found: {id}"),
        }
    }
}

impl Error for ChannelError {}

type Handler<E> = Rc<dyn Fn(&E)>;

struct ChannelState<E> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Handler<E>)>,
}

/// Multi-subscriber event channel.
pub struct Channel<E: 'static> {
    state: Rc<RefCell<ChannelState<E>>>,
}

impl<E: 'static> Channel<E> {
    /// Creates a channel with no subscribers.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ChannelState {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Registers one handler and returns its subscription id.
    pub fn subscribe(&self, handler: impl Fn(&E) + 'static) -> SubscriptionId {
        let mut state = self.state.borrow_mut();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.subscribers.push((id, Rc::new(handler)));
        id
    }

    /// Removes one handler.
    ///
    /// # Errors
    /// - `SubscriptionNotFound` when `id` is not currently subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
        let mut state = self.state.borrow_mut();
        let position = state
            .subscribers
            .iter()
            .position(|(candidate, _)| *candidate == id)
            .ok_or(ChannelError::SubscriptionNotFound(id))?;
        state.subscribers.remove(position);
        Ok(())
    }

    /// Delivers `event` to every current subscriber in subscribe order.
    pub fn publish(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .state
            .borrow()
            .subscribers
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.state
            .borrow()
            .subscribers
            .iter()
            .any(|(candidate, _)| *candidate == id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.borrow().subscribers.len()
    }
}

impl<E: 'static> Clone for Channel<E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<E: 'static> Default for Channel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Debug for Channel<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
