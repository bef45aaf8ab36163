// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Events posted into the power domain event loop.
//!
//! Interrupt handlers and asynchronous completions never modify the power domain tree directly.
//! Instead they post an [`Event`] onto an [`EventQueue`], which the manager drains from the main
//! loop.

use crate::{
    config::{EVENT_QUEUE_CAPACITY, MAX_POWER_DOMAINS},
    error::PowerError,
    power_domain::{Cookie, NodeId, ResponseStatus},
    power_state::{CompositeState, PowerState, SystemShutdown},
};
use arrayvec::ArrayVec;
use log::error;
use spin::mutex::SpinMutex;

/// Something which has happened and must be handled by the event loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// A driver has confirmed that its domain reached the given state.
    TransitionReport {
        /// The node whose driver made the report.
        node: NodeId,
        /// The state the hardware reached.
        state: PowerState,
    },
    /// A subscriber has finished work it deferred during a PRE phase.
    DeferredResponse {
        /// The cookie the subscriber was given.
        cookie: Cookie,
        /// The subscriber's answer.
        status: ResponseStatus,
    },
    /// A core's wakeup interrupt fired.
    CoreWakeup {
        /// The core to wake up.
        node: NodeId,
    },
    /// A core asked to be warm reset.
    WarmResetRequest {
        /// The core to reset.
        node: NodeId,
    },
    /// A periodic alarm started by a node's driver expired.
    AlarmExpired {
        /// The node whose driver started the alarm.
        node: NodeId,
    },
    /// A request to change the state of a single node.
    SetState {
        /// The node to change.
        node: NodeId,
        /// The state to move to.
        state: PowerState,
    },
    /// A request to change the state of a node and its ancestors.
    SetCompositeState {
        /// The lowest node of the request.
        node: NodeId,
        /// The states for each level.
        composite: CompositeState,
    },
    /// A request to suspend the whole system.
    SystemSuspend {
        /// The state for the root of the tree.
        state: PowerState,
    },
    /// A request to shut down or reset the whole system.
    SystemShutdown {
        /// The kind of shutdown.
        kind: SystemShutdown,
    },
}

/// A fixed-capacity FIFO of events, which may be posted to from any context.
///
/// Transition reports have room of their own, so a queue flooded with other events can't lose
/// the confirmation of a hardware change that has already happened.
pub struct EventQueue {
    inner: SpinMutex<Queue>,
}

struct Queue {
    events: ArrayVec<Event, QUEUE_STORAGE>,
    /// How many of `events` are transition reports.
    reports: usize,
}

const QUEUE_STORAGE: usize = EVENT_QUEUE_CAPACITY + MAX_POWER_DOMAINS;

impl EventQueue {
    /// Creates a new empty queue.
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(Queue {
                events: ArrayVec::new_const(),
                reports: 0,
            }),
        }
    }

    /// Adds an event to the back of the queue.
    ///
    /// Returns `Busy` if there is no room left for this kind of event. Up to
    /// [`EVENT_QUEUE_CAPACITY`] other events and [`MAX_POWER_DOMAINS`] transition reports may be
    /// queued.
    pub fn post(&self, event: Event) -> Result<(), PowerError> {
        let mut queue = self.inner.lock();
        let report = matches!(event, Event::TransitionReport { .. });
        let full = if report {
            queue.reports >= MAX_POWER_DOMAINS
        } else {
            queue.events.len() - queue.reports >= EVENT_QUEUE_CAPACITY
        };
        if full {
            error!("Event queue full, dropping {event:?}");
            return Err(PowerError::Busy);
        }
        queue.events.push(event);
        if report {
            queue.reports += 1;
        }
        Ok(())
    }

    /// Removes the event at the front of the queue, if any.
    pub fn pop(&self) -> Option<Event> {
        let mut queue = self.inner.lock();
        let event = queue.events.pop_at(0)?;
        if matches!(event, Event::TransitionReport { .. }) {
            queue.reports -= 1;
        }
        Some(event)
    }

    /// Returns whether there are no events waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
