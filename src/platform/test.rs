// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Fake hardware for unit tests, and a small platform built from it.
//!
//! The test topology is a system top with two clusters and a debug domain below it. The first
//! cluster has two cores and the second has one.

use super::Platform;
use crate::{
    config::PowerDomainConfig,
    driver::PowerDomainDriver,
    error::PowerError,
    event::{Event, EventQueue},
    interrupt::{IntId, InterruptController},
    logger::{self, LogSink},
    power_domain::{NodeId, PowerDomainManager},
    power_state::{PowerDomainType, PowerState, StateMask, TreePosition},
    ppu::{
        Ppu, PpuHardware, PpuMode,
        cluster::ClusterPpu,
        cpu::{CoreInterrupts, CorePpu},
        device::DevicePpu,
        system::SystemPpu,
    },
    timer::{Alarm, Timer},
};
use spin::{Lazy, mutex::SpinMutex};
use std::{
    fmt,
    io::{Write, stdout},
};

/// The first core of the first cluster.
pub const CORE0: NodeId = NodeId(0);
/// The second core of the first cluster.
pub const CORE1: NodeId = NodeId(1);
/// The only core of the second cluster.
pub const CORE2: NodeId = NodeId(2);
/// The first cluster.
pub const CLUSTER0: NodeId = NodeId(3);
/// The second cluster.
pub const CLUSTER1: NodeId = NodeId(4);
/// The debug domain.
pub const DEBUGSYS: NodeId = NodeId(5);
/// The system top, root of the tree.
pub const SYSTOP: NodeId = NodeId(6);

const CORE_STATES: [StateMask; PowerState::COUNT] = [
    StateMask::OFF.union(StateMask::SLEEP),
    StateMask::OFF.union(StateMask::ON).union(StateMask::SLEEP),
    StateMask::OFF.union(StateMask::SLEEP),
    StateMask::OFF,
    StateMask::OFF,
    StateMask::OFF,
];

const CLUSTER_STATES: [StateMask; PowerState::COUNT] = [
    StateMask::OFF,
    StateMask::OFF.union(StateMask::ON).union(StateMask::SLEEP),
    StateMask::OFF,
    StateMask::OFF,
    StateMask::OFF,
    StateMask::OFF,
];

const DEVICE_STATES: [StateMask; PowerState::COUNT] = [
    StateMask::OFF,
    StateMask::OFF.union(StateMask::ON),
    StateMask::OFF,
    StateMask::OFF,
    StateMask::OFF,
    StateMask::OFF,
];

const SYSTOP_STATES: [StateMask; 1] = [StateMask::OFF
    .union(StateMask::ON)
    .union(StateMask::SYSTEM_SLEEP0)];

/// The power domains of the test platform, in tree position order.
pub const TEST_POWER_DOMAINS: &[PowerDomainConfig] = &[
    PowerDomainConfig::new(
        "core0",
        PowerDomainType::Core,
        TreePosition::new(0, 0, 0, 0, 0),
        &CORE_STATES,
    ),
    PowerDomainConfig::new(
        "core1",
        PowerDomainType::Core,
        TreePosition::new(0, 0, 0, 0, 1),
        &CORE_STATES,
    ),
    PowerDomainConfig::new(
        "core2",
        PowerDomainType::Core,
        TreePosition::new(0, 0, 0, 1, 0),
        &CORE_STATES,
    ),
    PowerDomainConfig::new(
        "cluster0",
        PowerDomainType::Cluster,
        TreePosition::new(1, 0, 0, 0, 0),
        &CLUSTER_STATES,
    ),
    PowerDomainConfig::new(
        "cluster1",
        PowerDomainType::Cluster,
        TreePosition::new(1, 0, 0, 1, 0),
        &CLUSTER_STATES,
    ),
    PowerDomainConfig::new(
        "debugsys",
        PowerDomainType::DeviceDebug,
        TreePosition::new(1, 0, 0, 2, 0),
        &DEVICE_STATES,
    ),
    PowerDomainConfig::new(
        "systop",
        PowerDomainType::System,
        TreePosition::new(2, 0, 0, 0, 0),
        &SYSTOP_STATES,
    ),
];

/// The system used by [`TestPlatform`].
static SYSTEM: Lazy<TestSystem> = Lazy::new(TestSystem::new);

/// A fake platform for unit tests.
pub struct TestPlatform;

impl Platform for TestPlatform {
    const POWER_DOMAINS: &'static [PowerDomainConfig] = TEST_POWER_DOMAINS;

    fn init_logger() {
        static SINK: StdOutSink = StdOutSink;
        // Another test may have set it already.
        let _ = logger::init(&SINK);
    }

    fn drivers() -> &'static [&'static dyn PowerDomainDriver] {
        Box::leak(Box::new(SYSTEM.drivers()))
    }

    fn events() -> &'static EventQueue {
        SYSTEM.events
    }
}

/// A log sink which writes to standard output.
pub struct StdOutSink;

impl LogSink for StdOutSink {
    fn write_fmt(&self, args: fmt::Arguments) {
        stdout().write_fmt(args).unwrap();
    }
}

/// How long a [`FakePpu`] takes to reach a requested mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Latency {
    /// The status changes as soon as the policy is written.
    Immediate,
    /// The status changes after being read this many times.
    AfterPolls(u32),
    /// The status never changes by itself.
    Never,
}

/// A PPU which records every policy written to it.
#[derive(Debug)]
pub struct FakePpu {
    status: u32,
    policy: Option<PpuMode>,
    latency: Latency,
    polls_left: u32,
    history: Vec<PpuMode>,
}

impl FakePpu {
    /// Creates a PPU which is already in `mode`.
    pub fn new(mode: PpuMode) -> Self {
        Self {
            status: mode.into(),
            policy: None,
            latency: Latency::Immediate,
            polls_left: 0,
            history: Vec::new(),
        }
    }

    /// Changes how long the PPU takes to reach future requests.
    pub fn set_latency(&mut self, latency: Latency) {
        self.latency = latency;
    }

    /// Returns how many times the policy has been written.
    pub fn writes(&self) -> usize {
        self.history.len()
    }

    /// Returns every policy written so far.
    pub fn policy_history(&self) -> Vec<PpuMode> {
        self.history.clone()
    }

    /// Moves the status to the last requested mode.
    pub fn converge(&mut self) {
        if let Some(policy) = self.policy.take() {
            self.status = policy.into();
        }
    }

    /// Overwrites the raw status register.
    pub fn force_status(&mut self, raw: u32) {
        self.status = raw;
    }
}

impl PpuHardware for FakePpu {
    fn set_policy(&mut self, mode: PpuMode) {
        self.history.push(mode);
        self.policy = Some(mode);
        match self.latency {
            Latency::Immediate => self.converge(),
            Latency::AfterPolls(polls) => self.polls_left = polls,
            Latency::Never => {}
        }
    }

    fn status(&mut self) -> u32 {
        if let Latency::AfterPolls(_) = self.latency
            && self.policy.is_some()
        {
            if self.polls_left == 0 {
                self.converge();
            } else {
                self.polls_left -= 1;
            }
        }
        self.status
    }
}

/// A timer which polls a bounded number of times, without any notion of real time.
pub struct FakeTimer {
    max_polls: u32,
}

impl FakeTimer {
    /// Creates a timer which gives up after 1000 polls.
    pub fn new() -> Self {
        Self { max_polls: 1000 }
    }
}

impl Timer for FakeTimer {
    fn wait(&self, _timeout_us: u32, condition: &mut dyn FnMut() -> bool) -> Result<(), PowerError> {
        if (0..self.max_polls).any(|_| condition()) {
            Ok(())
        } else {
            Err(PowerError::DeviceError)
        }
    }
}

/// An alarm which only fires when the test tells it to.
pub struct FakeAlarm<'a> {
    events: &'a EventQueue,
    running: SpinMutex<Option<NodeId>>,
}

impl<'a> FakeAlarm<'a> {
    /// Creates a stopped alarm which posts to `events`.
    pub fn new(events: &'a EventQueue) -> Self {
        Self {
            events,
            running: SpinMutex::new(None),
        }
    }

    /// Posts an expiry event if the alarm is running.
    pub fn fire(&self) {
        if let Some(node) = *self.running.lock() {
            self.events.post(Event::AlarmExpired { node }).unwrap();
        }
    }

    /// Returns whether the alarm is running.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Alarm for FakeAlarm<'_> {
    fn start_periodic(&self, period_us: u32, node: NodeId) -> Result<(), PowerError> {
        if period_us == 0 {
            return Err(PowerError::InvalidParam);
        }
        *self.running.lock() = Some(node);
        Ok(())
    }

    fn stop(&self) {
        *self.running.lock() = None;
    }
}

const FAKE_INTERRUPT_COUNT: usize = 64;

/// An interrupt controller which only records the state of each line.
pub struct FakeInterrupts {
    enabled: SpinMutex<[bool; FAKE_INTERRUPT_COUNT]>,
    pending: SpinMutex<[bool; FAKE_INTERRUPT_COUNT]>,
}

impl FakeInterrupts {
    /// Creates a controller with every line disabled.
    pub fn new() -> Self {
        Self {
            enabled: SpinMutex::new([false; FAKE_INTERRUPT_COUNT]),
            pending: SpinMutex::new([false; FAKE_INTERRUPT_COUNT]),
        }
    }

    /// Marks a line as pending.
    pub fn raise(&self, id: IntId) {
        self.pending.lock()[id as usize] = true;
    }

    /// Returns whether a line is pending.
    pub fn is_pending(&self, id: IntId) -> bool {
        self.pending.lock()[id as usize]
    }

    fn set(
        lines: &SpinMutex<[bool; FAKE_INTERRUPT_COUNT]>,
        id: IntId,
        value: bool,
    ) -> Result<(), PowerError> {
        let mut lines = lines.lock();
        let line = lines
            .get_mut(id as usize)
            .ok_or(PowerError::InvalidParam)?;
        *line = value;
        Ok(())
    }
}

impl InterruptController for FakeInterrupts {
    fn enable(&self, id: IntId) -> Result<(), PowerError> {
        Self::set(&self.enabled, id, true)
    }

    fn disable(&self, id: IntId) -> Result<(), PowerError> {
        Self::set(&self.enabled, id, false)
    }

    fn clear_pending(&self, id: IntId) -> Result<(), PowerError> {
        Self::set(&self.pending, id, false)
    }

    fn is_enabled(&self, id: IntId) -> Result<bool, PowerError> {
        self.enabled
            .lock()
            .get(id as usize)
            .copied()
            .ok_or(PowerError::InvalidParam)
    }
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// The drivers of the test topology, on fake hardware.
///
/// Everything is leaked so that the drivers can be handed to a manager for `'static`.
pub struct TestSystem {
    /// The event queue every driver reports to.
    pub events: &'static EventQueue,
    /// The timer used for every PPU wait.
    pub timer: &'static FakeTimer,
    /// The interrupt controller for the core interrupt lines.
    pub interrupts: &'static FakeInterrupts,
    /// The alarm shared by the cores for system suspend.
    pub alarm: &'static FakeAlarm<'static>,
    /// The core drivers.
    pub cores: [&'static CorePpu<'static, FakePpu>; 3],
    /// The cluster drivers.
    pub clusters: [&'static ClusterPpu<'static, FakePpu>; 2],
    /// The debug domain driver.
    pub debug: &'static DevicePpu<'static, FakePpu>,
    /// The system top driver.
    pub systop: &'static SystemPpu<'static, FakePpu>,
}

impl TestSystem {
    /// Creates a system with the system top and the first cluster on, and everything else off.
    pub fn new() -> Self {
        let events = leak(EventQueue::new());
        let timer = leak(FakeTimer::new());
        let interrupts = leak(FakeInterrupts::new());
        let alarm = leak(FakeAlarm::new(events));

        let ppu = |name, mode| Ppu::new(name, FakePpu::new(mode), Some(timer as &dyn Timer), events);
        let core = |index: u32, name| {
            let lines = CoreInterrupts {
                wakeup_irq: 32 + 3 * index,
                wakeup_fiq: 33 + 3 * index,
                warm_reset_irq: 34 + 3 * index,
            };
            leak(CorePpu::new(
                ppu(name, PpuMode::Off),
                interrupts,
                lines,
                Some(alarm as &dyn Alarm),
            ))
        };

        let debug = leak(DevicePpu::new(ppu("debugsys", PpuMode::Off)));
        Self {
            events,
            timer,
            interrupts,
            alarm,
            cores: [core(0, "core0"), core(1, "core1"), core(2, "core2")],
            clusters: [
                leak(ClusterPpu::new(ppu("cluster0", PpuMode::On), Some(debug))),
                leak(ClusterPpu::new(ppu("cluster1", PpuMode::Off), Some(debug))),
            ],
            debug,
            systop: leak(SystemPpu::new(ppu("systop", PpuMode::On))),
        }
    }

    /// Returns the drivers in the order of [`TEST_POWER_DOMAINS`].
    pub fn drivers(&self) -> [&'static dyn PowerDomainDriver; 7] {
        [
            self.cores[0],
            self.cores[1],
            self.cores[2],
            self.clusters[0],
            self.clusters[1],
            self.debug,
            self.systop,
        ]
    }

    /// Creates a manager for the system. Can only be called once per system, as drivers can only
    /// be bound once.
    pub fn manager(&self) -> PowerDomainManager<'static> {
        PowerDomainManager::new(TEST_POWER_DOMAINS, &self.drivers(), self.events).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_manager() {
        TestPlatform::init_logger();
        let manager = TestPlatform::power_domain_manager().unwrap();
        assert_eq!(manager.tree().len(), TEST_POWER_DOMAINS.len());
        assert_eq!(manager.get_state(SYSTOP), Ok(PowerState::On));
    }

    #[test]
    fn fake_ppu_latency() {
        let mut ppu = FakePpu::new(PpuMode::Off);
        ppu.set_latency(Latency::AfterPolls(2));
        ppu.set_policy(PpuMode::On);
        assert_eq!(ppu.status(), 0);
        assert_eq!(ppu.status(), 0);
        assert_eq!(ppu.status(), 8);
        assert_eq!(ppu.writes(), 1);
    }

    #[test]
    fn fake_interrupts() {
        let interrupts = FakeInterrupts::new();
        interrupts.raise(3);
        interrupts.enable(3).unwrap();
        interrupts.clear_pending(3).unwrap();
        assert!(interrupts.is_enabled(3).unwrap());
        assert!(!interrupts.is_pending(3));
        assert_eq!(
            interrupts.enable(FAKE_INTERRUPT_COUNT as IntId),
            Err(PowerError::InvalidParam)
        );
    }
}
