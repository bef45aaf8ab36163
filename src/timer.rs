// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Bounded waits and periodic alarms.

use crate::{
    error::PowerError,
    event::{Event, EventQueue},
    power_domain::NodeId,
};
use core::hint::spin_loop;
use log::warn;
use spin::mutex::SpinMutex;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// A service for waiting on a condition with a timeout.
pub trait Timer: Sync {
    /// Polls `condition` until it returns true, or until `timeout_us` microseconds have passed.
    ///
    /// Returns `DeviceError` if the condition was still false at the timeout.
    fn wait(&self, timeout_us: u32, condition: &mut dyn FnMut() -> bool) -> Result<(), PowerError>;
}

/// A periodic alarm which posts [`Event::AlarmExpired`] for a node each time it fires.
pub trait Alarm: Sync {
    /// Starts the alarm, replacing any previous configuration.
    fn start_periodic(&self, period_us: u32, node: NodeId) -> Result<(), PowerError>;

    /// Stops the alarm. Does nothing if it is not running.
    fn stop(&self);
}

/// A free-running counter.
pub trait Counter: Sync {
    /// Returns the current count.
    fn ticks(&self) -> u64;

    /// Returns the rate at which the counter increments.
    fn frequency_hz(&self) -> u64;

    /// Converts a duration in microseconds to counter ticks, rounding up.
    fn ticks_for(&self, micros: u32) -> u64 {
        (u64::from(micros) * self.frequency_hz()).div_ceil(MICROS_PER_SECOND)
    }
}

/// A [`Timer`] which busy-waits on a free-running counter.
pub struct CounterTimer<'a, C: Counter> {
    counter: &'a C,
}

impl<'a, C: Counter> CounterTimer<'a, C> {
    /// Creates a timer using the given counter.
    pub const fn new(counter: &'a C) -> Self {
        Self { counter }
    }
}

impl<C: Counter> Timer for CounterTimer<'_, C> {
    fn wait(&self, timeout_us: u32, condition: &mut dyn FnMut() -> bool) -> Result<(), PowerError> {
        let start = self.counter.ticks();
        let timeout = self.counter.ticks_for(timeout_us);
        loop {
            if condition() {
                return Ok(());
            }
            if self.counter.ticks().wrapping_sub(start) > timeout {
                // The condition may have become true while the counter was being read.
                return if condition() {
                    Ok(())
                } else {
                    Err(PowerError::DeviceError)
                };
            }
            spin_loop();
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct AlarmConfig {
    node: NodeId,
    period: u64,
    deadline: u64,
}

/// An [`Alarm`] driven by polling a counter from the idle loop.
///
/// [`PollingAlarm::poll`] must be called regularly, typically from the idle hook of the event
/// loop. It posts one event per expiry.
pub struct PollingAlarm<'a, C: Counter> {
    counter: &'a C,
    events: &'a EventQueue,
    config: SpinMutex<Option<AlarmConfig>>,
}

impl<'a, C: Counter> PollingAlarm<'a, C> {
    /// Creates a stopped alarm.
    pub const fn new(counter: &'a C, events: &'a EventQueue) -> Self {
        Self {
            counter,
            events,
            config: SpinMutex::new(None),
        }
    }

    /// Posts an event if the alarm is running and its deadline has passed.
    pub fn poll(&self) {
        let mut config = self.config.lock();
        let Some(config) = config.as_mut() else {
            return;
        };
        let now = self.counter.ticks();
        if now < config.deadline {
            return;
        }
        config.deadline = now + config.period;
        if self
            .events
            .post(Event::AlarmExpired { node: config.node })
            .is_err()
        {
            warn!("Alarm for {:?} expired with the event queue full", config.node);
        }
    }

    /// Returns whether the alarm is running.
    pub fn is_running(&self) -> bool {
        self.config.lock().is_some()
    }
}

impl<C: Counter> Alarm for PollingAlarm<'_, C> {
    fn start_periodic(&self, period_us: u32, node: NodeId) -> Result<(), PowerError> {
        if period_us == 0 {
            return Err(PowerError::InvalidParam);
        }
        let period = self.counter.ticks_for(period_us);
        *self.config.lock() = Some(AlarmConfig {
            node,
            period,
            deadline: self.counter.ticks() + period,
        });
        Ok(())
    }

    fn stop(&self) {
        *self.config.lock() = None;
    }
}
