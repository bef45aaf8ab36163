// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Two-phase broadcast of power domain state transitions to subscribers.
//!
//! Before a transition is committed, every subscriber to the PRE phase of the node is told about
//! it and may accept it, veto it, or defer its answer. A deferred answer is tied to a [`Cookie`]
//! which must be resolved exactly once before the transition can continue. After the hardware
//! reaches the new state, subscribers to the POST phase are told about it and can't respond.

use super::power_domain_tree::NodeId;
use crate::{
    config::{MAX_PENDING_TRANSITIONS, MAX_REGISTRATIONS, MAX_SUBSCRIBERS},
    error::PowerError,
    power_state::{PowerState, SystemShutdown},
};
use arrayvec::ArrayVec;
use log::{debug, error, warn};

/// Identifies a single delivery of a notification which was answered with
/// [`PreTransitionResponse::Deferred`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cookie(u32);

impl Cookie {
    /// Returns the raw cookie value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Identifies a subscriber added to the broadcaster.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubscriberId(usize);

/// The phase of a transition a notification is sent for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Before the hardware changes state.
    Pre,
    /// After the hardware changed state.
    Post,
}

/// Something a subscriber can subscribe to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Topic {
    /// One phase of the transitions of one node.
    Transition(NodeId, Phase),
    /// An imminent system shutdown.
    PreShutdown,
}

/// The immediate answer of a subscriber to a PRE transition notification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreTransitionResponse {
    /// The transition may go ahead.
    Success,
    /// The transition must not happen.
    Failure,
    /// The answer will be given later, by resolving the cookie of the notification.
    Deferred,
}

/// The final answer given for a deferred notification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseStatus {
    /// The transition may go ahead.
    Success,
    /// The transition must not happen.
    Failure,
}

/// Sent to PRE phase subscribers before a node changes state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PreTransitionNotification {
    /// The node about to change state.
    pub node: NodeId,
    /// The state the node is in.
    pub current_state: PowerState,
    /// The state the node is about to enter.
    pub target_state: PowerState,
    /// Identifies this delivery, for a deferred response.
    pub cookie: Cookie,
}

/// Sent to POST phase subscribers after a node changed state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PostTransitionNotification {
    /// The node which changed state.
    pub node: NodeId,
    /// The state the node was in.
    pub previous_state: PowerState,
    /// The state the node is now in.
    pub state: PowerState,
}

/// A component which wants to know about power domain state transitions.
///
/// Callbacks run on the event loop, and must not block.
pub trait TransitionSubscriber: Sync {
    /// Called before `notification.node` changes state.
    ///
    /// Returning [`PreTransitionResponse::Deferred`] holds the transition until
    /// `notification.cookie` is resolved.
    fn on_pre_transition(
        &self,
        _notification: &PreTransitionNotification,
        _subscriptions: &mut Subscriptions,
    ) -> PreTransitionResponse {
        PreTransitionResponse::Success
    }

    /// Called after `notification.node` changed state.
    fn on_post_transition(
        &self,
        _notification: &PostTransitionNotification,
        _subscriptions: &mut Subscriptions,
    ) {
    }

    /// Called before the system shuts down. Failures are logged, but don't stop the shutdown.
    fn on_pre_shutdown(&self, _kind: SystemShutdown, _cookie: Cookie) -> PreTransitionResponse {
        PreTransitionResponse::Success
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Registration {
    subscriber: SubscriberId,
    topic: Topic,
}

/// Lets a subscriber change its own subscriptions, including from within a callback.
///
/// Changes made during a broadcast take effect from the next broadcast.
pub struct Subscriptions<'r> {
    subscriber: SubscriberId,
    registrations: &'r mut ArrayVec<Registration, MAX_REGISTRATIONS>,
}

impl Subscriptions<'_> {
    /// Returns the id of the subscriber this handle belongs to.
    pub fn id(&self) -> SubscriberId {
        self.subscriber
    }

    /// Subscribes to one phase of the transitions of `node`. Subscribing twice has no effect.
    pub fn subscribe(&mut self, node: NodeId, phase: Phase) -> Result<(), PowerError> {
        self.add(Topic::Transition(node, phase))
    }

    /// Removes a subscription made with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&mut self, node: NodeId, phase: Phase) -> Result<(), PowerError> {
        self.remove(Topic::Transition(node, phase))
    }

    /// Subscribes to notifications of an imminent system shutdown.
    pub fn subscribe_pre_shutdown(&mut self) -> Result<(), PowerError> {
        self.add(Topic::PreShutdown)
    }

    /// Returns whether the subscriber is subscribed to `topic`.
    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.registrations.contains(&Registration {
            subscriber: self.subscriber,
            topic,
        })
    }

    fn add(&mut self, topic: Topic) -> Result<(), PowerError> {
        let registration = Registration {
            subscriber: self.subscriber,
            topic,
        };
        if self.registrations.contains(&registration) {
            return Ok(());
        }
        self.registrations.try_push(registration).map_err(|_| {
            error!("No room to register {topic:?}");
            PowerError::Busy
        })
    }

    fn remove(&mut self, topic: Topic) -> Result<(), PowerError> {
        let registration = Registration {
            subscriber: self.subscriber,
            topic,
        };
        let index = self
            .registrations
            .iter()
            .position(|r| *r == registration)
            .ok_or(PowerError::InvalidParam)?;
        // Keep the order, as it is the delivery order.
        self.registrations.remove(index);
        Ok(())
    }
}

/// What a PRE phase round is for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    /// A state transition of the node.
    Transition(NodeId),
    /// A system shutdown.
    Shutdown(SystemShutdown),
}

/// The outcome of a PRE phase round once every subscriber has answered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Resolution {
    /// What the round was for.
    pub origin: Origin,
    /// Whether every subscriber accepted.
    pub succeeded: bool,
}

/// The state of a PRE phase round right after delivery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhaseStatus {
    /// Every subscriber has answered.
    Complete {
        /// Whether every subscriber accepted.
        succeeded: bool,
    },
    /// At least one subscriber deferred its answer.
    Pending,
}

/// A PRE phase round waiting for deferred responses.
#[derive(Debug)]
struct PendingTransition {
    origin: Origin,
    outstanding: ArrayVec<(SubscriberId, Cookie), MAX_SUBSCRIBERS>,
    failed: bool,
}

/// Delivers notifications to subscribers and tracks deferred responses.
pub struct Broadcaster<'a> {
    subscribers: ArrayVec<&'a dyn TransitionSubscriber, MAX_SUBSCRIBERS>,
    registrations: ArrayVec<Registration, MAX_REGISTRATIONS>,
    pending: ArrayVec<PendingTransition, MAX_PENDING_TRANSITIONS>,
    next_cookie: u32,
}

impl<'a> Broadcaster<'a> {
    /// Creates a broadcaster with no subscribers.
    pub const fn new() -> Self {
        Self {
            subscribers: ArrayVec::new_const(),
            registrations: ArrayVec::new_const(),
            pending: ArrayVec::new_const(),
            next_cookie: 1,
        }
    }

    /// Adds a subscriber, which starts without any subscriptions.
    pub fn add_subscriber(
        &mut self,
        subscriber: &'a dyn TransitionSubscriber,
    ) -> Result<SubscriberId, PowerError> {
        let id = SubscriberId(self.subscribers.len());
        self.subscribers.try_push(subscriber).map_err(|_| {
            error!("Too many subscribers");
            PowerError::Busy
        })?;
        Ok(id)
    }

    /// Returns a handle to change the subscriptions of `subscriber`.
    pub fn subscriptions(
        &mut self,
        subscriber: SubscriberId,
    ) -> Result<Subscriptions<'_>, PowerError> {
        if subscriber.0 >= self.subscribers.len() {
            return Err(PowerError::InvalidParam);
        }
        Ok(Subscriptions {
            subscriber,
            registrations: &mut self.registrations,
        })
    }

    /// Returns whether a PRE phase round for `origin` is waiting for deferred responses.
    pub fn is_pending(&self, origin: Origin) -> bool {
        self.pending.iter().any(|round| round.origin == origin)
    }

    /// Returns the subscribers to `topic`, in registration order.
    fn recipients(&self, topic: Topic) -> ArrayVec<SubscriberId, MAX_REGISTRATIONS> {
        self.registrations
            .iter()
            .filter(|registration| registration.topic == topic)
            .map(|registration| registration.subscriber)
            .collect()
    }

    fn next_cookie(&mut self) -> Cookie {
        let cookie = Cookie(self.next_cookie);
        self.next_cookie = self.next_cookie.wrapping_add(1).max(1);
        cookie
    }

    /// Runs a PRE phase round, calling `deliver` for each recipient of `topic`.
    fn run_round(
        &mut self,
        origin: Origin,
        topic: Topic,
        mut deliver: impl FnMut(&dyn TransitionSubscriber, Cookie, &mut Subscriptions) -> PreTransitionResponse,
    ) -> Result<PhaseStatus, PowerError> {
        if self.pending.is_full() {
            error!("Too many transitions waiting for responses");
            return Err(PowerError::Busy);
        }

        let mut round = PendingTransition {
            origin,
            outstanding: ArrayVec::new(),
            failed: false,
        };
        for id in self.recipients(topic) {
            let cookie = self.next_cookie();
            let subscriber = self.subscribers[id.0];
            let mut subscriptions = Subscriptions {
                subscriber: id,
                registrations: &mut self.registrations,
            };
            match deliver(subscriber, cookie, &mut subscriptions) {
                PreTransitionResponse::Success => {}
                PreTransitionResponse::Failure => {
                    warn!("{origin:?}: subscriber {} refused", id.0);
                    round.failed = true;
                }
                PreTransitionResponse::Deferred => {
                    debug!("{origin:?}: subscriber {} deferred with {cookie:?}", id.0);
                    // One delivery per subscriber, so this can't overflow.
                    round.outstanding.push((id, cookie));
                }
            }
        }

        if round.outstanding.is_empty() {
            Ok(PhaseStatus::Complete {
                succeeded: !round.failed,
            })
        } else {
            self.pending.push(round);
            Ok(PhaseStatus::Pending)
        }
    }

    /// Tells PRE phase subscribers of `node` that it is about to move from `current_state` to
    /// `target_state`.
    pub fn notify_pre(
        &mut self,
        node: NodeId,
        current_state: PowerState,
        target_state: PowerState,
    ) -> Result<PhaseStatus, PowerError> {
        self.run_round(
            Origin::Transition(node),
            Topic::Transition(node, Phase::Pre),
            |subscriber, cookie, subscriptions| {
                let notification = PreTransitionNotification {
                    node,
                    current_state,
                    target_state,
                    cookie,
                };
                subscriber.on_pre_transition(&notification, subscriptions)
            },
        )
    }

    /// Tells pre-shutdown subscribers that the system is about to shut down.
    pub fn notify_pre_shutdown(&mut self, kind: SystemShutdown) -> Result<PhaseStatus, PowerError> {
        self.run_round(
            Origin::Shutdown(kind),
            Topic::PreShutdown,
            |subscriber, cookie, _| subscriber.on_pre_shutdown(kind, cookie),
        )
    }

    /// Tells POST phase subscribers of `node` that it moved from `previous_state` to `state`.
    pub fn notify_post(&mut self, node: NodeId, previous_state: PowerState, state: PowerState) {
        let notification = PostTransitionNotification {
            node,
            previous_state,
            state,
        };
        for id in self.recipients(Topic::Transition(node, Phase::Post)) {
            let subscriber = self.subscribers[id.0];
            let mut subscriptions = Subscriptions {
                subscriber: id,
                registrations: &mut self.registrations,
            };
            subscriber.on_post_transition(&notification, &mut subscriptions);
        }
    }

    /// Records the deferred response for `cookie`.
    ///
    /// Returns the resolution of the round once this was its last outstanding response. An
    /// unknown or already resolved cookie is rejected with `InvalidParam` and has no effect.
    pub fn resolve(
        &mut self,
        cookie: Cookie,
        status: ResponseStatus,
    ) -> Result<Option<Resolution>, PowerError> {
        let Some(index) = self.pending.iter().position(|round| {
            round
                .outstanding
                .iter()
                .any(|(_, outstanding)| *outstanding == cookie)
        }) else {
            warn!("Ignoring response for unknown {cookie:?}");
            return Err(PowerError::InvalidParam);
        };

        let round = &mut self.pending[index];
        round
            .outstanding
            .retain(|(_, outstanding)| *outstanding != cookie);
        if status == ResponseStatus::Failure {
            warn!("{:?}: deferred response {cookie:?} refused", round.origin);
            round.failed = true;
        }
        if !round.outstanding.is_empty() {
            return Ok(None);
        }

        let round = self.pending.remove(index);
        Ok(Some(Resolution {
            origin: round.origin,
            succeeded: !round.failed,
        }))
    }

    /// Drops every round waiting for responses. Their cookies become unknown.
    pub fn abandon_pending(&mut self) {
        self.pending.clear();
    }
}

impl Default for Broadcaster<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::mutex::SpinMutex;

    /// Records what it receives and answers PRE notifications with a fixed response.
    struct Recorder {
        response: PreTransitionResponse,
        log: SpinMutex<Vec<(Phase, NodeId, PowerState, Option<Cookie>)>>,
        unsubscribe_on_post: bool,
    }

    impl Recorder {
        fn new(response: PreTransitionResponse) -> Self {
            Self {
                response,
                log: SpinMutex::new(Vec::new()),
                unsubscribe_on_post: false,
            }
        }

        fn cookies(&self) -> Vec<Cookie> {
            self.log.lock().iter().filter_map(|entry| entry.3).collect()
        }
    }

    impl TransitionSubscriber for Recorder {
        fn on_pre_transition(
            &self,
            notification: &PreTransitionNotification,
            _subscriptions: &mut Subscriptions,
        ) -> PreTransitionResponse {
            self.log.lock().push((
                Phase::Pre,
                notification.node,
                notification.target_state,
                Some(notification.cookie),
            ));
            self.response
        }

        fn on_post_transition(
            &self,
            notification: &PostTransitionNotification,
            subscriptions: &mut Subscriptions,
        ) {
            self.log
                .lock()
                .push((Phase::Post, notification.node, notification.state, None));
            if self.unsubscribe_on_post {
                subscriptions
                    .unsubscribe(notification.node, Phase::Post)
                    .unwrap();
            }
        }
    }

    const NODE: NodeId = NodeId(3);

    fn subscribe(broadcaster: &mut Broadcaster, id: SubscriberId, phase: Phase) {
        broadcaster
            .subscriptions(id)
            .unwrap()
            .subscribe(NODE, phase)
            .unwrap();
    }

    #[test]
    fn immediate_responses() {
        let accept = Recorder::new(PreTransitionResponse::Success);
        let refuse = Recorder::new(PreTransitionResponse::Failure);
        let mut broadcaster = Broadcaster::new();

        assert_eq!(
            broadcaster.notify_pre(NODE, PowerState::On, PowerState::Off),
            Ok(PhaseStatus::Complete { succeeded: true })
        );

        let accept_id = broadcaster.add_subscriber(&accept).unwrap();
        subscribe(&mut broadcaster, accept_id, Phase::Pre);
        assert_eq!(
            broadcaster.notify_pre(NODE, PowerState::On, PowerState::Off),
            Ok(PhaseStatus::Complete { succeeded: true })
        );

        let refuse_id = broadcaster.add_subscriber(&refuse).unwrap();
        subscribe(&mut broadcaster, refuse_id, Phase::Pre);
        assert_eq!(
            broadcaster.notify_pre(NODE, PowerState::On, PowerState::Off),
            Ok(PhaseStatus::Complete { succeeded: false })
        );
        // Everyone is still told.
        assert_eq!(accept.log.lock().len(), 2);
        assert_eq!(refuse.log.lock().len(), 1);

        // Other nodes are not delivered to.
        assert_eq!(
            broadcaster.notify_pre(NodeId(0), PowerState::On, PowerState::Off),
            Ok(PhaseStatus::Complete { succeeded: true })
        );
        assert_eq!(accept.log.lock().len(), 2);
    }

    #[test]
    fn deferred_cookies_resolve_exactly_once() {
        let first = Recorder::new(PreTransitionResponse::Deferred);
        let second = Recorder::new(PreTransitionResponse::Deferred);
        let mut broadcaster = Broadcaster::new();
        for subscriber in [&first, &second] {
            let id = broadcaster.add_subscriber(subscriber).unwrap();
            subscribe(&mut broadcaster, id, Phase::Pre);
        }

        assert_eq!(
            broadcaster.notify_pre(NODE, PowerState::Off, PowerState::On),
            Ok(PhaseStatus::Pending)
        );
        assert!(broadcaster.is_pending(Origin::Transition(NODE)));
        let first_cookie = first.cookies()[0];
        let second_cookie = second.cookies()[0];
        assert_ne!(first_cookie, second_cookie);

        assert_eq!(
            broadcaster.resolve(first_cookie, ResponseStatus::Success),
            Ok(None)
        );
        assert_eq!(
            broadcaster.resolve(first_cookie, ResponseStatus::Success),
            Err(PowerError::InvalidParam)
        );
        assert_eq!(
            broadcaster.resolve(second_cookie, ResponseStatus::Success),
            Ok(Some(Resolution {
                origin: Origin::Transition(NODE),
                succeeded: true
            }))
        );
        assert!(!broadcaster.is_pending(Origin::Transition(NODE)));
        assert_eq!(
            broadcaster.resolve(second_cookie, ResponseStatus::Success),
            Err(PowerError::InvalidParam)
        );
    }

    #[test]
    fn deferred_failure() {
        let deferring = Recorder::new(PreTransitionResponse::Deferred);
        let mut broadcaster = Broadcaster::new();
        let id = broadcaster.add_subscriber(&deferring).unwrap();
        subscribe(&mut broadcaster, id, Phase::Pre);

        broadcaster
            .notify_pre(NODE, PowerState::Off, PowerState::On)
            .unwrap();
        let cookie = deferring.cookies()[0];
        assert_eq!(
            broadcaster.resolve(cookie, ResponseStatus::Failure),
            Ok(Some(Resolution {
                origin: Origin::Transition(NODE),
                succeeded: false
            }))
        );
    }

    #[test]
    fn post_in_registration_order_with_unsubscribe() {
        let mut first = Recorder::new(PreTransitionResponse::Success);
        first.unsubscribe_on_post = true;
        let second = Recorder::new(PreTransitionResponse::Success);
        let mut broadcaster = Broadcaster::new();
        let first_id = broadcaster.add_subscriber(&first).unwrap();
        let second_id = broadcaster.add_subscriber(&second).unwrap();
        subscribe(&mut broadcaster, second_id, Phase::Post);
        subscribe(&mut broadcaster, first_id, Phase::Post);
        subscribe(&mut broadcaster, first_id, Phase::Post);

        broadcaster.notify_post(NODE, PowerState::Off, PowerState::On);
        assert_eq!(first.log.lock().len(), 1);
        assert_eq!(second.log.lock().len(), 1);
        assert!(
            !broadcaster
                .subscriptions(first_id)
                .unwrap()
                .is_subscribed(Topic::Transition(NODE, Phase::Post))
        );

        broadcaster.notify_post(NODE, PowerState::On, PowerState::Off);
        assert_eq!(first.log.lock().len(), 1);
        assert_eq!(second.log.lock().len(), 2);
    }

    #[test]
    fn unknown_subscriber() {
        let recorder = Recorder::new(PreTransitionResponse::Success);
        let mut broadcaster = Broadcaster::new();
        assert!(broadcaster.subscriptions(SubscriberId(0)).is_err());
        let id = broadcaster.add_subscriber(&recorder).unwrap();
        assert_eq!(
            broadcaster
                .subscriptions(id)
                .unwrap()
                .unsubscribe(NODE, Phase::Pre),
            Err(PowerError::InvalidParam)
        );
    }
}
