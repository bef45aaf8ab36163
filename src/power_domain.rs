// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The power domain manager.
//!
//! The manager owns the power domain tree, the drivers of each node and the notification
//! broadcaster. Every state change goes through the same sequence for each node involved: the
//! driver is asked whether it denies the change, PRE phase subscribers are notified and may defer,
//! the driver commits the change, and once the driver reports that the hardware got there POST
//! phase subscribers are notified.
//!
//! Requests involving several nodes move one node at a time. A node which can't move yet because
//! of the state of its other children keeps its requested state, and moves once the last of them
//! reports a compatible state.

pub mod notification;
pub mod power_domain_tree;

pub use notification::{
    Cookie, Phase, PostTransitionNotification, PreTransitionNotification, PreTransitionResponse,
    ResponseStatus, SubscriberId, Subscriptions, TransitionSubscriber,
};
pub use power_domain_tree::{NodeId, PowerDomainNode, PowerDomainTree, TransitionPhase};

use crate::{
    config::{MAX_LEVELS, MAX_POWER_DOMAINS, MAX_REQUESTS, PowerDomainConfig},
    driver::PowerDomainDriver,
    error::PowerError,
    event::{Event, EventQueue},
    power_state::{CompositeState, PowerDomainType, PowerState, SystemShutdown},
};
use arrayvec::ArrayVec;
use core::mem;
use log::{debug, error, info, trace, warn};
use notification::{Broadcaster, Origin, PhaseStatus};

/// Identifies a request whose outcome is reported by [`PowerDomainManager::take_completed`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestId(u32);

/// How far a request got before the call which made it returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestStatus {
    /// The request is complete, and POST phase subscribers have been notified.
    Done,
    /// The request is waiting for deferred responses or for the hardware. Its outcome will be
    /// available from [`PowerDomainManager::take_completed`].
    Pending(RequestId),
}

/// The outcome of a request which didn't complete immediately.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Completion {
    /// The request.
    pub id: RequestId,
    /// Whether it succeeded.
    pub result: Result<(), PowerError>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Step {
    node: NodeId,
    state: PowerState,
}

#[derive(Debug)]
enum Work {
    /// Move each node to its state in turn.
    Transition {
        steps: ArrayVec<Step, MAX_LEVELS>,
        cursor: usize,
    },
    /// Wait for the last core to turn off, then move its ancestors.
    SystemSuspend { core: NodeId, state: PowerState },
    /// Wait for pre-shutdown subscribers, then shut down.
    Shutdown { kind: SystemShutdown },
}

#[derive(Debug)]
struct Request {
    id: RequestId,
    /// Whether the outcome is recorded for `take_completed`.
    notify: bool,
    work: Work,
}

/// Manages the power domains of the system.
pub struct PowerDomainManager<'a> {
    tree: PowerDomainTree,
    drivers: ArrayVec<&'a dyn PowerDomainDriver, MAX_POWER_DOMAINS>,
    /// The request which owns the transition in flight for each node.
    owners: [Option<RequestId>; MAX_POWER_DOMAINS],
    broadcaster: Broadcaster<'a>,
    events: &'a EventQueue,
    requests: ArrayVec<Request, MAX_REQUESTS>,
    completed: ArrayVec<Completion, MAX_REQUESTS>,
    next_request: u32,
    /// A system suspend waiting for the last core to turn off.
    suspend: Option<RequestId>,
}

impl<'a> PowerDomainManager<'a> {
    /// Builds the tree from `configs` and binds `drivers[i]` to node `i`.
    ///
    /// The initial state of each node is read from its driver.
    pub fn new(
        configs: &[PowerDomainConfig],
        drivers: &[&'a dyn PowerDomainDriver],
        events: &'a EventQueue,
    ) -> Result<Self, PowerError> {
        let mut tree = PowerDomainTree::new(configs)?;
        if drivers.len() != tree.len() {
            error!(
                "{} drivers given for {} power domains",
                drivers.len(),
                tree.len()
            );
            return Err(PowerError::InvalidParam);
        }

        for id in tree.ids() {
            let driver = drivers[id.0];
            driver.bind(id)?;
            let state = driver.get_state()?;
            let node = tree.node_mut(id)?;
            node.set_current_state(state);
            node.set_requested_state(state);
        }
        for id in tree.ids() {
            let node = tree.node(id)?;
            if !tree.is_allowed_by_parent(id, node.current_state()) {
                warn!(
                    "{}: initial state {} not allowed by parent",
                    node.name(),
                    node.current_state()
                );
            }
        }
        info!("{} power domains", tree.len());
        trace!("{tree:?}");

        Ok(Self {
            tree,
            drivers: drivers.iter().copied().collect(),
            owners: [None; MAX_POWER_DOMAINS],
            broadcaster: Broadcaster::new(),
            events,
            requests: ArrayVec::new(),
            completed: ArrayVec::new(),
            next_request: 0,
            suspend: None,
        })
    }

    /// Returns the power domain tree.
    pub fn tree(&self) -> &PowerDomainTree {
        &self.tree
    }

    fn driver(&self, node: NodeId) -> Result<&'a dyn PowerDomainDriver, PowerError> {
        self.drivers
            .get(node.0)
            .copied()
            .ok_or(PowerError::InvalidParam)
    }

    /// Adds a subscriber, which starts without any subscriptions.
    pub fn add_subscriber(
        &mut self,
        subscriber: &'a dyn TransitionSubscriber,
    ) -> Result<SubscriberId, PowerError> {
        self.broadcaster.add_subscriber(subscriber)
    }

    /// Subscribes to one phase of the transitions of `node`.
    pub fn subscribe(
        &mut self,
        subscriber: SubscriberId,
        node: NodeId,
        phase: Phase,
    ) -> Result<(), PowerError> {
        self.tree.node(node)?;
        self.broadcaster
            .subscriptions(subscriber)?
            .subscribe(node, phase)
    }

    /// Removes a subscription made with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(
        &mut self,
        subscriber: SubscriberId,
        node: NodeId,
        phase: Phase,
    ) -> Result<(), PowerError> {
        self.broadcaster
            .subscriptions(subscriber)?
            .unsubscribe(node, phase)
    }

    /// Subscribes to notifications of an imminent system shutdown.
    pub fn subscribe_pre_shutdown(&mut self, subscriber: SubscriberId) -> Result<(), PowerError> {
        self.broadcaster
            .subscriptions(subscriber)?
            .subscribe_pre_shutdown()
    }

    /// Returns the last state reported for `node`.
    pub fn get_state(&self, node: NodeId) -> Result<PowerState, PowerError> {
        Ok(self.tree.node(node)?.current_state())
    }

    /// Returns the states of `node` and all its ancestors.
    pub fn get_composite_state(&self, node: NodeId) -> Result<CompositeState, PowerError> {
        self.tree.composite_state(node)
    }

    /// Returns where `node` is in a transition.
    pub fn phase(&self, node: NodeId) -> Result<TransitionPhase, PowerError> {
        Ok(self.tree.node(node)?.phase())
    }

    /// Returns whether the driver of `node` currently refuses `state`.
    pub fn deny(&self, node: NodeId, state: PowerState) -> Result<bool, PowerError> {
        Ok(self.driver(node)?.deny(state))
    }

    /// Moves a single node to `state`.
    ///
    /// The state must be allowed by the current state of the parent, and must allow the current
    /// states of the children. Requesting the state the node is already in succeeds without
    /// touching the hardware.
    ///
    /// Returns `Busy` while the node, or its parent or a child heading for a state that conflicts
    /// with `state`, is in a transition. A transition whose PRE phase was deferred is checked
    /// against the tree again before the hardware is touched.
    pub fn request_state(
        &mut self,
        node: NodeId,
        state: PowerState,
    ) -> Result<RequestStatus, PowerError> {
        match self.submit_state(node, state, true)? {
            Some(id) => self.settle(id),
            None => Ok(RequestStatus::Done),
        }
    }

    /// Moves `node` and its ancestors up to the highest level of `composite` to the state given for
    /// their level.
    ///
    /// Going deeper, nodes move from the bottom up. Going shallower, from the top down. A node
    /// whose other children are still in states it doesn't allow is left to move later.
    pub fn request_composite_state(
        &mut self,
        node: NodeId,
        composite: CompositeState,
    ) -> Result<RequestStatus, PowerError> {
        match self.submit_composite(node, composite, true)? {
            Some(id) => self.settle(id),
            None => Ok(RequestStatus::Done),
        }
    }

    /// Pulses `node` through warm reset. The node must be on, with all its children off.
    pub fn reset(&mut self, node: NodeId) -> Result<(), PowerError> {
        let entry = self.tree.node(node)?;
        if entry.is_busy() {
            return Err(PowerError::Busy);
        }
        if entry.current_state() == PowerState::Off {
            warn!("{}: can't reset while off", entry.name());
            return Err(PowerError::InvalidParam);
        }
        if self
            .tree
            .children(node)
            .any(|child| self.tree.node(child).map(PowerDomainNode::current_state) != Ok(PowerState::Off))
        {
            warn!("{}: can't reset with children on", entry.name());
            return Err(PowerError::InvalidParam);
        }
        info!("{}: reset", entry.name());
        self.driver(node)?.reset()
    }

    /// Suspends the system, leaving the root in `state`.
    ///
    /// Exactly one core may be running. It is turned off without notifications, and once it is off
    /// its ancestors follow, with the root entering `state`. Any request made before the core turns
    /// off cancels the suspend.
    pub fn system_suspend(&mut self, state: PowerState) -> Result<RequestStatus, PowerError> {
        let id = self.submit_system_suspend(state, true)?;
        self.settle(id)
    }

    /// Shuts down or resets the whole system.
    ///
    /// Pre-shutdown subscribers are notified first and may defer. Then every driver prepares for
    /// the shutdown, and every node is recorded as OFF.
    pub fn system_shutdown(&mut self, kind: SystemShutdown) -> Result<RequestStatus, PowerError> {
        let id = self.submit_system_shutdown(kind, true)?;
        self.settle(id)
    }

    /// Gives the final answer for a PRE phase notification which was deferred.
    ///
    /// Returns `InvalidParam` for a cookie which is unknown or already resolved.
    pub fn resolve_deferred(
        &mut self,
        cookie: Cookie,
        status: ResponseStatus,
    ) -> Result<(), PowerError> {
        self.apply_response(cookie, status)?;
        self.process_events();
        Ok(())
    }

    /// Returns the outcomes of requests which completed after the call that made them returned.
    pub fn take_completed(&mut self) -> ArrayVec<Completion, MAX_REQUESTS> {
        mem::take(&mut self.completed)
    }

    /// Handles every event in the queue, including any posted while doing so.
    pub fn process_events(&mut self) {
        while let Some(event) = self.events.pop() {
            self.process_event(event);
        }
    }

    /// Handles a single event.
    pub fn process_event(&mut self, event: Event) {
        trace!("{event:?}");
        let result = match event {
            Event::TransitionReport { node, state } => self.on_report(node, state),
            Event::DeferredResponse { cookie, status } => self.apply_response(cookie, status),
            Event::CoreWakeup { node } => self.wake_core(node),
            Event::WarmResetRequest { node } => self.reset(node),
            Event::AlarmExpired { node } => {
                self.driver(node).and_then(|driver| driver.process_alarm())
            }
            Event::SetState { node, state } => self.submit_state(node, state, false).map(drop),
            Event::SetCompositeState { node, composite } => {
                self.submit_composite(node, composite, false).map(drop)
            }
            Event::SystemSuspend { state } => {
                self.submit_system_suspend(state, false).map(drop)
            }
            Event::SystemShutdown { kind } => self.submit_system_shutdown(kind, false).map(drop),
        };
        if let Err(e) = result {
            warn!("Failed to handle {event:?}: {e}");
        }
    }

    /// Runs the event loop forever, calling `idle` whenever the queue is empty.
    pub fn run(&mut self, mut idle: impl FnMut()) -> ! {
        loop {
            self.process_events();
            idle();
        }
    }

    /// Drains the event queue and returns whether request `id` finished.
    fn settle(&mut self, id: RequestId) -> Result<RequestStatus, PowerError> {
        self.process_events();
        match self.completed.iter().position(|completion| completion.id == id) {
            Some(index) => self
                .completed
                .remove(index)
                .result
                .map(|()| RequestStatus::Done),
            None => Ok(RequestStatus::Pending(id)),
        }
    }

    fn submit_state(
        &mut self,
        node: NodeId,
        state: PowerState,
        notify: bool,
    ) -> Result<Option<RequestId>, PowerError> {
        let entry = self.tree.node(node)?;
        let name = entry.name();
        let current_state = entry.current_state();
        if !self.tree.is_allowed_by_parent(node, state) {
            warn!("{name}: {state} not allowed by parent");
            return Err(PowerError::InvalidParam);
        }
        if entry.is_busy() {
            return Err(PowerError::Busy);
        }
        if !self.tree.is_allowed_by_transitions(node, state) {
            warn!("{name}: {state} conflicts with a transition in flight");
            return Err(PowerError::Busy);
        }
        self.cancel_system_suspend();
        if current_state == state {
            self.tree.node_mut(node)?.set_requested_state(state);
            return Ok(None);
        }
        if !self.tree.is_allowed_by_children(node, state) {
            warn!("{name}: {state} not allowed by children");
            return Err(PowerError::InvalidParam);
        }

        let mut steps = ArrayVec::new();
        steps.push(Step { node, state });
        let id = self.start(Work::Transition { steps, cursor: 0 }, notify)?;
        self.advance(id);
        Ok(Some(id))
    }

    fn submit_composite(
        &mut self,
        node: NodeId,
        composite: CompositeState,
        notify: bool,
    ) -> Result<Option<RequestId>, PowerError> {
        self.tree.validate_composite(node, &composite)?;

        let mut steps: ArrayVec<Step, MAX_LEVELS> = ArrayVec::new();
        for id in self.tree.chain(node, composite.highest_level()) {
            let entry = self.tree.node(id)?;
            if entry.is_busy() {
                return Err(PowerError::Busy);
            }
            let state = composite
                .state(entry.level())
                .ok_or(PowerError::InvalidParam)?;
            if !self.tree.is_allowed_by_transitions(id, state) {
                warn!("{}: {state} conflicts with a transition in flight", entry.name());
                return Err(PowerError::Busy);
            }
            steps.push(Step { node: id, state });
        }
        self.cancel_system_suspend();

        // The first level whose request changes decides the direction.
        let deeper = steps.iter().find_map(|step| {
            let requested = self.tree.node(step.node).ok()?.requested_state();
            (requested != step.state).then(|| step.state.is_deeper_than(requested))
        });
        if deeper == Some(false) {
            steps.reverse();
        }

        if steps.iter().all(|step| {
            self.tree
                .node(step.node)
                .is_ok_and(|entry| entry.current_state() == step.state)
        }) {
            for step in &steps {
                self.tree.node_mut(step.node)?.set_requested_state(step.state);
            }
            return Ok(None);
        }

        let id = self.start(Work::Transition { steps, cursor: 0 }, notify)?;
        self.advance(id);
        Ok(Some(id))
    }

    fn submit_system_suspend(
        &mut self,
        state: PowerState,
        notify: bool,
    ) -> Result<RequestId, PowerError> {
        let root = self.tree.root();
        if !state.is_deeper_than(PowerState::On)
            || !self.tree.node(root)?.valid_states().allows(state)
        {
            return Err(PowerError::InvalidParam);
        }

        let mut last_core = None;
        let mut running_cores = 0;
        let mut running_clusters = 0;
        for id in self.tree.ids() {
            let node = self.tree.node(id)?;
            if node.current_state() == PowerState::Off {
                continue;
            }
            match node.config().domain_type {
                PowerDomainType::Core => {
                    running_cores += 1;
                    last_core = Some(id);
                }
                PowerDomainType::Cluster => running_clusters += 1,
                _ => {}
            }
        }
        let core = match last_core {
            Some(core) if running_cores == 1 && running_clusters <= 1 => core,
            _ => {
                warn!(
                    "Can't suspend with {running_cores} cores and {running_clusters} clusters running"
                );
                return Err(PowerError::Denied);
            }
        };
        if self.tree.node(core)?.is_busy() {
            return Err(PowerError::Busy);
        }
        if self.requests.is_full() {
            return Err(PowerError::Busy);
        }
        self.cancel_system_suspend();

        self.driver(core)?.prepare_for_suspend()?;
        let id = self.start(Work::SystemSuspend { core, state }, notify)?;
        let node = self.tree.node_mut(core)?;
        info!("System suspend to {state}, waiting for {}", node.name());
        node.set_requested_state(PowerState::Off);
        node.set_phase(TransitionPhase::AwaitingPostTransitionBroadcast);
        self.owners[core.0] = Some(id);
        self.suspend = Some(id);
        Ok(id)
    }

    fn submit_system_shutdown(
        &mut self,
        kind: SystemShutdown,
        notify: bool,
    ) -> Result<RequestId, PowerError> {
        if self
            .requests
            .iter()
            .any(|request| matches!(request.work, Work::Shutdown { .. }))
        {
            return Err(PowerError::Busy);
        }
        let id = self.start(Work::Shutdown { kind }, notify)?;
        info!("System shutdown: {kind:?}");
        match self.broadcaster.notify_pre_shutdown(kind) {
            Ok(PhaseStatus::Complete { succeeded }) => {
                if !succeeded {
                    warn!("Shutting down despite subscriber failures");
                }
                self.perform_shutdown(kind);
            }
            Ok(PhaseStatus::Pending) => {}
            Err(e) => self.finish(id, Err(e)),
        }
        Ok(id)
    }

    fn wake_core(&mut self, node: NodeId) -> Result<(), PowerError> {
        let root_level = self.tree.node(self.tree.root())?.level();
        info!("{}: wakeup", self.tree.node(node)?.name());
        let composite = CompositeState::uniform(root_level, PowerState::On)?;
        self.submit_composite(node, composite, false).map(drop)
    }

    /// Records a new request. Its transition steps become the requested states of their nodes.
    fn start(&mut self, work: Work, notify: bool) -> Result<RequestId, PowerError> {
        let id = RequestId(self.next_request);
        let targets = match &work {
            Work::Transition { steps, .. } => steps.clone(),
            Work::SystemSuspend { .. } | Work::Shutdown { .. } => ArrayVec::new(),
        };
        for step in &targets {
            self.tree.node(step.node)?;
        }
        self.requests
            .try_push(Request { id, notify, work })
            .map_err(|_| {
                error!("Too many requests in flight");
                PowerError::Busy
            })?;
        self.next_request = self.next_request.wrapping_add(1);

        for step in targets {
            self.tree.node_mut(step.node)?.set_requested_state(step.state);
        }
        Ok(id)
    }

    fn request_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.requests.iter_mut().find(|request| request.id == id)
    }

    /// Returns the step request `id` is on, finishing the request if it has none left.
    fn next_step(&mut self, id: RequestId) -> Option<Step> {
        let step = match &self.request_mut(id)?.work {
            Work::Transition { steps, cursor } => steps.get(*cursor).copied(),
            Work::SystemSuspend { .. } | Work::Shutdown { .. } => return None,
        };
        if step.is_none() {
            self.finish(id, Ok(()));
        }
        step
    }

    fn step_done(&mut self, id: RequestId) {
        if let Some(Request {
            work: Work::Transition { cursor, .. },
            ..
        }) = self.request_mut(id)
        {
            *cursor += 1;
        }
    }

    /// Starts the next step of request `id` which needs the hardware to change.
    fn advance(&mut self, id: RequestId) {
        while let Some(step) = self.next_step(id) {
            let Ok(node) = self.tree.node(step.node) else {
                self.finish(id, Err(PowerError::InvalidParam));
                return;
            };
            if node.current_state() == step.state {
                self.step_done(id);
                continue;
            }
            if !self.tree.is_allowed_by_parent(step.node, step.state) {
                warn!("{}: {} not allowed by parent", node.name(), step.state);
                self.finish(id, Err(PowerError::InvalidParam));
                return;
            }
            if !self.tree.is_allowed_by_children(step.node, step.state) {
                debug!("{}: {} waits for children", node.name(), step.state);
                self.step_done(id);
                continue;
            }
            if !self.tree.is_allowed_by_transitions(step.node, step.state) {
                warn!("{}: {} conflicts with a transition in flight", node.name(), step.state);
                self.finish(id, Err(PowerError::Busy));
                return;
            }
            if let Err(e) = self.begin_transition(id, step) {
                self.finish(id, Err(e));
            }
            return;
        }
    }

    fn begin_transition(&mut self, id: RequestId, step: Step) -> Result<(), PowerError> {
        let driver = self.driver(step.node)?;
        let node = self.tree.node_mut(step.node)?;
        let name = node.name();
        let current_state = node.current_state();
        let notifications = !node.config().disable_state_transition_notifications;

        node.set_phase(TransitionPhase::RequestingHardware);
        if driver.deny(step.state) {
            warn!("{name}: {} denied", step.state);
            node.set_phase(TransitionPhase::Idle);
            return Err(PowerError::Denied);
        }
        self.owners[step.node.0] = Some(id);
        debug!("{name}: {current_state} -> {}", step.state);

        if !notifications {
            return self.commit(step.node, step.state);
        }
        node.set_phase(TransitionPhase::AwaitingPreTransitionResponses);
        match self
            .broadcaster
            .notify_pre(step.node, current_state, step.state)
        {
            Ok(PhaseStatus::Complete { succeeded: true }) => self.commit(step.node, step.state),
            Ok(PhaseStatus::Complete { succeeded: false }) => {
                self.release(step.node);
                Err(PowerError::Denied)
            }
            Ok(PhaseStatus::Pending) => Ok(()),
            Err(e) => {
                self.release(step.node);
                Err(e)
            }
        }
    }

    /// Asks the driver to move `node` to `state`. Completion is confirmed by its report.
    fn commit(&mut self, node: NodeId, state: PowerState) -> Result<(), PowerError> {
        let driver = self.driver(node)?;
        let entry = self.tree.node_mut(node)?;
        entry.set_phase(TransitionPhase::Committing);
        match driver.set_state(state) {
            Ok(()) if !driver.reports_transitions() => {
                entry.set_phase(TransitionPhase::AwaitingPostTransitionBroadcast);
                self.on_report(node, state)
            }
            Ok(()) => {
                entry.set_phase(TransitionPhase::AwaitingPostTransitionBroadcast);
                Ok(())
            }
            Err(e) if driver.get_state() == Ok(state) => {
                // The hardware got there but the driver couldn't report it.
                warn!("{}: entered {state} unreported: {e}", entry.name());
                entry.set_phase(TransitionPhase::AwaitingPostTransitionBroadcast);
                self.on_report(node, state)
            }
            Err(e) => {
                error!("{}: failed to enter {state}: {e}", entry.name());
                self.release(node);
                Err(e)
            }
        }
    }

    fn release(&mut self, node: NodeId) {
        if let Ok(entry) = self.tree.node_mut(node) {
            entry.set_phase(TransitionPhase::Idle);
        }
        if let Some(owner) = self.owners.get_mut(node.0) {
            *owner = None;
        }
    }

    fn apply_response(&mut self, cookie: Cookie, status: ResponseStatus) -> Result<(), PowerError> {
        let Some(resolution) = self.broadcaster.resolve(cookie, status)? else {
            return Ok(());
        };
        match resolution.origin {
            Origin::Transition(node) => {
                let owner = self.owners.get(node.0).copied().flatten();
                let target = self.tree.node(node)?.requested_state();
                let result = if !resolution.succeeded {
                    self.release(node);
                    Err(PowerError::Denied)
                } else if !self.tree.is_allowed(node, target)
                    || !self.tree.is_allowed_by_transitions(node, target)
                {
                    // The parent or a child moved while the subscribers were deciding.
                    warn!("{}: {target} no longer allowed", self.tree.node(node)?.name());
                    self.release(node);
                    Err(PowerError::InvalidParam)
                } else {
                    self.commit(node, target)
                };
                if let (Err(e), Some(owner)) = (result, owner) {
                    self.finish(owner, Err(e));
                }
            }
            Origin::Shutdown(kind) => self.perform_shutdown(kind),
        }
        Ok(())
    }

    fn on_report(&mut self, node: NodeId, state: PowerState) -> Result<(), PowerError> {
        let entry = self.tree.node_mut(node)?;
        let previous_state = entry.current_state();
        let solicited = entry.phase() == TransitionPhase::AwaitingPostTransitionBroadcast;
        let notifications = !entry.config().disable_state_transition_notifications;
        let parent = entry.parent();
        entry.set_current_state(state);
        if !solicited {
            entry.set_requested_state(state);
        }
        info!("{}: {previous_state} -> {state}", entry.name());

        if notifications {
            self.broadcaster.notify_post(node, previous_state, state);
        }
        let owner = if solicited {
            let owner = self.owners[node.0].take();
            self.tree
                .node_mut(node)?
                .set_phase(TransitionPhase::Idle);
            owner
        } else {
            None
        };
        if let Some(owner) = owner {
            self.on_step_reported(owner, node, state);
        }

        if state.is_deeper_than(previous_state) {
            if let Some(parent) = parent {
                self.resume_parked(parent);
            }
        } else if state.is_shallower_than(previous_state) {
            for child in self.tree.children(node) {
                self.resume_parked(child);
            }
        }
        Ok(())
    }

    fn on_step_reported(&mut self, id: RequestId, node: NodeId, state: PowerState) {
        let Some(request) = self.request_mut(id) else {
            return;
        };
        match &request.work {
            Work::Transition { steps, cursor } => {
                let Some(step) = steps.get(*cursor).copied() else {
                    return;
                };
                if step.node != node {
                    return;
                }
                if step.state == state {
                    self.step_done(id);
                    self.advance(id);
                } else {
                    error!("{node:?}: reached {state} instead of {}", step.state);
                    self.finish(id, Err(PowerError::DeviceError));
                }
            }
            &Work::SystemSuspend { core, state: target } if core == node => {
                if state == PowerState::Off {
                    self.complete_system_suspend(id, core, target);
                } else {
                    error!("{node:?}: reached {state} instead of OFF for suspend");
                    self.finish(id, Err(PowerError::DeviceError));
                }
            }
            Work::SystemSuspend { .. } | Work::Shutdown { .. } => {}
        }
    }

    /// Starts the transition of a node whose requested state had to wait for its parent or
    /// children, if they now allow it.
    fn resume_parked(&mut self, node: NodeId) {
        let Ok(entry) = self.tree.node(node) else {
            return;
        };
        let target = entry.requested_state();
        if entry.is_busy()
            || target == entry.current_state()
            || !self.tree.is_allowed(node, target)
        {
            return;
        }
        debug!("{}: resuming transition to {target}", entry.name());
        let mut steps = ArrayVec::new();
        steps.push(Step {
            node,
            state: target,
        });
        match self.start(Work::Transition { steps, cursor: 0 }, false) {
            Ok(id) => self.advance(id),
            Err(e) => error!("{node:?}: failed to resume transition: {e}"),
        }
    }

    fn complete_system_suspend(&mut self, id: RequestId, core: NodeId, state: PowerState) {
        self.suspend = None;
        let root = self.tree.root();
        let Ok(root_level) = self.tree.node(root).map(PowerDomainNode::level) else {
            return;
        };
        let steps: ArrayVec<Step, MAX_LEVELS> = self
            .tree
            .chain(core, root_level)
            .into_iter()
            .skip(1)
            .map(|node| Step {
                node,
                state: if node == root { state } else { PowerState::Off },
            })
            .collect();
        for step in &steps {
            if let Ok(node) = self.tree.node_mut(step.node) {
                node.set_requested_state(step.state);
            }
        }
        if let Some(request) = self.request_mut(id) {
            request.work = Work::Transition { steps, cursor: 0 };
        }
        self.advance(id);
    }

    /// Cancels a system suspend which is still waiting for its core to turn off.
    fn cancel_system_suspend(&mut self) {
        if let Some(id) = self.suspend.take() {
            info!("System suspend cancelled");
            self.finish(id, Err(PowerError::Busy));
        }
    }

    fn perform_shutdown(&mut self, kind: SystemShutdown) {
        for id in self.tree.ids() {
            let Ok(node) = self.tree.node(id) else {
                continue;
            };
            if let Err(e) = self.drivers[id.0].shutdown(kind) {
                error!("{}: shutdown failed: {e}", node.name());
            }
        }

        self.broadcaster.abandon_pending();
        self.suspend = None;
        for id in self.tree.ids() {
            if let Ok(node) = self.tree.node_mut(id) {
                node.set_current_state(PowerState::Off);
                node.set_requested_state(PowerState::Off);
                node.set_phase(TransitionPhase::Idle);
            }
        }
        self.owners = [None; MAX_POWER_DOMAINS];

        let requests: ArrayVec<(RequestId, bool), MAX_REQUESTS> = self
            .requests
            .iter()
            .map(|request| (request.id, matches!(request.work, Work::Shutdown { .. })))
            .collect();
        for (id, shutdown) in requests {
            self.finish(id, if shutdown { Ok(()) } else { Err(PowerError::Denied) });
        }
    }

    /// Removes request `id`, recording its outcome if the caller asked for it.
    fn finish(&mut self, id: RequestId, result: Result<(), PowerError>) {
        let Some(index) = self.requests.iter().position(|request| request.id == id) else {
            return;
        };
        let request = self.requests.remove(index);
        if self.suspend == Some(id) {
            self.suspend = None;
        }

        match result {
            Ok(()) => debug!("{id:?} done"),
            Err(e) => {
                warn!("{id:?} failed: {e}");
                // Steps which didn't happen are no longer wanted.
                if let Work::Transition { steps, cursor } = &request.work {
                    for step in steps.iter().skip(*cursor) {
                        if let Ok(node) = self.tree.node_mut(step.node)
                            && !node.is_busy()
                        {
                            node.set_requested_state(node.current_state());
                        }
                    }
                }
            }
        }

        if request.notify {
            if self.completed.is_full() {
                let dropped = self.completed.remove(0);
                warn!("Dropping unclaimed completion of {:?}", dropped.id);
            }
            self.completed.push(Completion { id, result });
        }
    }
}
