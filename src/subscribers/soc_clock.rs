// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! SoC clock control, restored whenever the system top domain powers back on.

use crate::{
    error::PowerError,
    power_domain::{
        NodeId, Phase, PostTransitionNotification, PowerDomainManager, SubscriberId,
        Subscriptions, TransitionSubscriber,
    },
    power_state::PowerState,
};
use log::{error, info};
use spin::mutex::SpinMutex;

/// Where a clock is derived from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClockSource {
    /// The system reference clock.
    SysRefClk,
    /// The system PLL.
    SysInClk,
    /// A PLL private to the clock.
    PrivatePll,
}

/// One of the rates a clock supports, and how to produce it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClockRate {
    /// The output frequency.
    pub rate_hz: u64,
    /// The source to select.
    pub source: ClockSource,
    /// The divider to apply to the source, from 1 to 16.
    pub divider: u8,
}

/// Access to the clock control registers.
pub trait SocClockHardware: Send {
    /// Moves the internal and SoC clocks back onto the system PLL after it has been lost. The
    /// debug clocks are only touched if `debug_clocks` is set.
    fn select_system_sources(&mut self, debug_clocks: bool) -> Result<(), PowerError>;

    /// Programs the output clock. With `wait` set, waits for the hardware to confirm each step.
    fn program(&mut self, rate: &ClockRate, wait: bool) -> Result<(), PowerError>;
}

#[derive(Debug)]
struct ClockState {
    domain_on: bool,
    debug_on: bool,
    initialised: bool,
    rate_index: usize,
}

/// A clock whose configuration is lost when its domain powers off.
pub struct SocClock<'a, H: SocClockHardware> {
    name: &'static str,
    node: NodeId,
    debug_node: NodeId,
    hardware: SpinMutex<H>,
    rates: &'a [ClockRate],
    state: SpinMutex<ClockState>,
}

impl<'a, H: SocClockHardware + 'a> SocClock<'a, H> {
    /// Creates a clock in the domain of `node`, whose debug clocks are in the domain of
    /// `debug_node`.
    ///
    /// `rates` must be non-empty and sorted by ascending rate.
    pub fn new(
        name: &'static str,
        node: NodeId,
        debug_node: NodeId,
        hardware: H,
        rates: &'a [ClockRate],
    ) -> Result<Self, PowerError> {
        if rates.is_empty()
            || rates.windows(2).any(|pair| pair[0].rate_hz > pair[1].rate_hz)
            || rates.iter().any(|rate| !(1..=16).contains(&rate.divider))
        {
            return Err(PowerError::InvalidParam);
        }
        Ok(Self {
            name,
            node,
            debug_node,
            hardware: SpinMutex::new(hardware),
            rates,
            state: SpinMutex::new(ClockState {
                domain_on: false,
                debug_on: false,
                initialised: false,
                rate_index: 0,
            }),
        })
    }

    /// Adds the clock to `manager`, listening for the POST phase of both of its domains.
    pub fn register(
        &'a self,
        manager: &mut PowerDomainManager<'a>,
    ) -> Result<SubscriberId, PowerError> {
        let domain_on = manager.get_state(self.node)? == PowerState::On;
        let debug_on = manager.get_state(self.debug_node)? == PowerState::On;
        let id = manager.add_subscriber(self)?;
        manager.subscribe(id, self.node, Phase::Post)?;
        manager.subscribe(id, self.debug_node, Phase::Post)?;

        let mut state = self.state.lock();
        state.domain_on = domain_on;
        state.debug_on = debug_on;
        Ok(id)
    }

    /// Sets the output to one of the supported rates, which must match exactly.
    pub fn set_rate(&self, rate_hz: u64) -> Result<(), PowerError> {
        let index = self
            .rates
            .iter()
            .position(|rate| rate.rate_hz == rate_hz)
            .ok_or(PowerError::InvalidParam)?;
        let mut state = self.state.lock();
        self.hardware
            .lock()
            .program(&self.rates[index], state.domain_on)?;
        state.rate_index = index;
        state.initialised = true;
        Ok(())
    }

    /// Returns the output rate, or `None` if it hasn't been set since the domain powered on.
    pub fn rate(&self) -> Option<u64> {
        let state = self.state.lock();
        state
            .initialised
            .then(|| self.rates[state.rate_index].rate_hz)
    }

    /// Returns the lowest and highest supported rates.
    pub fn range(&self) -> (u64, u64) {
        let first = self.rates.first().map_or(0, |rate| rate.rate_hz);
        let last = self.rates.last().map_or(0, |rate| rate.rate_hz);
        (first, last)
    }

    /// Returns whether the debug clocks can be used.
    pub fn debug_clocks_available(&self) -> bool {
        self.state.lock().debug_on
    }

    fn restore(&self, state: &ClockState) -> Result<(), PowerError> {
        let mut hardware = self.hardware.lock();
        hardware.select_system_sources(state.debug_on)?;
        hardware.program(&self.rates[state.rate_index], true)
    }
}

impl<'a, H: SocClockHardware + 'a> TransitionSubscriber for SocClock<'a, H> {
    fn on_post_transition(
        &self,
        notification: &PostTransitionNotification,
        _subscriptions: &mut Subscriptions,
    ) {
        let mut state = self.state.lock();
        if notification.node == self.debug_node {
            state.debug_on = notification.state == PowerState::On;
        } else if notification.node == self.node {
            state.domain_on = notification.state == PowerState::On;
            if !state.domain_on {
                state.initialised = false;
                return;
            }
            match self.restore(&state) {
                Ok(()) => {
                    state.initialised = true;
                    info!(
                        "{}: restored at {} Hz",
                        self.name, self.rates[state.rate_index].rate_hz
                    );
                }
                Err(e) => error!("{}: failed to restore clocks: {e}", self.name),
            }
        }
    }
}
