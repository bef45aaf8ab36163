// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Drivers for the Power Policy Unit, the hardware block which gates power to a domain.
//!
//! [`Ppu`] holds the state shared by every variant: the register access, the bound node, and the
//! policy used to confirm that the hardware reached a requested mode. The domain-specific drivers
//! in the submodules wrap it and implement [`PowerDomainDriver`](crate::driver::PowerDomainDriver).

pub mod cluster;
pub mod cpu;
pub mod device;
pub mod rom;
pub mod system;

use crate::{
    error::PowerError,
    event::{Event, EventQueue},
    power_domain::NodeId,
    power_state::{PowerState, SystemShutdown},
    timer::Timer,
};
use core::hint::spin_loop;
use log::{error, trace};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use safe_mmio::{
    UniqueMmioPointer, field, field_shared,
    fields::{ReadPure, ReadPureWrite},
};
#[cfg(test)]
use spin::mutex::SpinMutexGuard;
use spin::{Once, mutex::SpinMutex};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// How long to wait for the hardware to reach a requested mode before giving up.
pub const PPU_SET_STATE_TIMEOUT_US: u32 = 100 * 1000;

/// The bits of the status register which hold the current mode.
const PPU_STATUS_MODE_MASK: u32 = 0xf;

/// A hardware power mode of a PPU.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum PpuMode {
    /// Powered off.
    Off = 0,
    /// Logic off, memories retained.
    MemRetention = 2,
    /// Powered on.
    On = 8,
    /// Powered on and held in warm reset.
    WarmReset = 9,
}

impl PpuMode {
    /// Returns the power state which the domain is in when its PPU is in this mode.
    pub const fn power_state(self) -> PowerState {
        match self {
            Self::Off => PowerState::Off,
            Self::MemRetention | Self::WarmReset | Self::On => PowerState::On,
        }
    }

    /// Returns the mode to program for a domain to enter `state`.
    pub const fn for_power_state(state: PowerState) -> Result<Self, PowerError> {
        match state {
            PowerState::Off | PowerState::Sleep => Ok(Self::Off),
            PowerState::On => Ok(Self::On),
            PowerState::MemRetention => Ok(Self::MemRetention),
            PowerState::WarmReset => Ok(Self::WarmReset),
            PowerState::SystemSleep0 => Err(PowerError::Unsupported),
        }
    }
}

/// Access to the policy and status registers of a PPU.
pub trait PpuHardware: Send {
    /// Requests the given mode.
    fn set_policy(&mut self, mode: PpuMode);

    /// Reads the raw status register.
    fn status(&mut self) -> u32;
}

/// The PPU register block.
#[derive(Clone, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C, align(4))]
pub struct PpuRegisters {
    /// Power policy register: the mode software is requesting.
    pub power_policy: ReadPureWrite<u32>,
    /// Power status register: the mode the hardware is in.
    pub power_status: ReadPure<u32>,
}

/// A memory-mapped PPU.
pub struct MmioPpu<'a> {
    regs: UniqueMmioPointer<'a, PpuRegisters>,
}

impl<'a> MmioPpu<'a> {
    /// Creates a driver for the PPU with the given registers.
    pub fn new(regs: UniqueMmioPointer<'a, PpuRegisters>) -> Self {
        Self { regs }
    }
}

impl PpuHardware for MmioPpu<'_> {
    fn set_policy(&mut self, mode: PpuMode) {
        field!(self.regs, power_policy).write(mode.into());
    }

    fn status(&mut self) -> u32 {
        field_shared!(self.regs, power_status).read()
    }
}

/// State common to all PPU driver variants.
pub struct Ppu<'a, H: PpuHardware> {
    name: &'static str,
    hardware: SpinMutex<H>,
    timer: Option<&'a dyn Timer>,
    events: Option<&'a EventQueue>,
    node: Once<NodeId>,
}

impl<'a, H: PpuHardware> Ppu<'a, H> {
    /// Creates a PPU context which reports completed transitions to `events`.
    ///
    /// Without a timer, waits for the hardware spin forever.
    pub fn new(
        name: &'static str,
        hardware: H,
        timer: Option<&'a dyn Timer>,
        events: &'a EventQueue,
    ) -> Self {
        Self {
            name,
            hardware: SpinMutex::new(hardware),
            timer,
            events: Some(events),
            node: Once::new(),
        }
    }

    /// Creates a PPU context which never reports transitions, for use before the event loop
    /// exists.
    pub fn unreported(name: &'static str, hardware: H, timer: Option<&'a dyn Timer>) -> Self {
        Self {
            name,
            hardware: SpinMutex::new(hardware),
            timer,
            events: None,
            node: Once::new(),
        }
    }

    /// Returns the name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Records the node this PPU serves. Binding again to the same node is allowed.
    pub fn bind(&self, node: NodeId) -> Result<(), PowerError> {
        let bound = *self.node.call_once(|| node);
        if bound == node {
            Ok(())
        } else {
            error!("{}: already bound to {bound:?}", self.name);
            Err(PowerError::InvalidParam)
        }
    }

    /// Returns the node this PPU is bound to, if any.
    pub fn node(&self) -> Option<NodeId> {
        self.node.get().copied()
    }

    /// Reads the current hardware mode.
    pub fn mode(&self) -> Result<PpuMode, PowerError> {
        let raw = self.hardware.lock().status() & PPU_STATUS_MODE_MASK;
        PpuMode::try_from(raw).map_err(|_| {
            error!("{}: unexpected PPU mode {raw:#x}", self.name);
            PowerError::DeviceError
        })
    }

    fn is_in_mode(&self, mode: PpuMode) -> bool {
        self.mode() == Ok(mode)
    }

    /// Requests a mode without waiting for the hardware to reach it.
    pub fn request_mode(&self, mode: PpuMode) {
        trace!("{}: requesting {mode:?}", self.name);
        self.hardware.lock().set_policy(mode);
    }

    /// Requests a mode and waits for the hardware to reach it.
    ///
    /// With a timer this gives up after [`PPU_SET_STATE_TIMEOUT_US`] and returns `DeviceError`.
    /// The request is not retried.
    pub fn set_mode_and_wait(&self, mode: PpuMode) -> Result<(), PowerError> {
        self.request_mode(mode);
        match self.timer {
            Some(timer) => timer
                .wait(PPU_SET_STATE_TIMEOUT_US, &mut || self.is_in_mode(mode))
                .map_err(|_| {
                    error!("{}: timed out waiting for {mode:?}", self.name);
                    PowerError::DeviceError
                }),
            None => {
                self.spin_until(mode);
                Ok(())
            }
        }
    }

    /// Requests a mode and spins with no timeout until the hardware reaches it.
    pub fn set_mode_and_spin(&self, mode: PpuMode) {
        self.request_mode(mode);
        self.spin_until(mode);
    }

    /// Spins with no timeout until the hardware reaches `mode`.
    pub fn spin_until(&self, mode: PpuMode) {
        while !self.is_in_mode(mode) {
            spin_loop();
        }
    }

    /// Tells the event loop that the bound node has reached `state`.
    ///
    /// Does nothing if the PPU is unbound or was created without an event queue.
    pub fn report(&self, state: PowerState) -> Result<(), PowerError> {
        match (self.node(), self.events) {
            (Some(node), Some(events)) => events.post(Event::TransitionReport { node, state }),
            _ => Ok(()),
        }
    }

    /// Posts an arbitrary event for the bound node.
    pub(crate) fn post(&self, event: impl FnOnce(NodeId) -> Event) -> Result<(), PowerError> {
        match (self.node(), self.events) {
            (Some(node), Some(events)) => events.post(event(node)),
            _ => Err(PowerError::InvalidParam),
        }
    }

    /// Pulses warm reset and returns the domain to ON.
    pub fn warm_reset(&self) -> Result<(), PowerError> {
        self.set_mode_and_wait(PpuMode::WarmReset)?;
        self.set_mode_and_wait(PpuMode::On)
    }

    /// Locks and returns the underlying hardware, for inspection in tests.
    #[cfg(test)]
    pub fn hardware(&self) -> SpinMutexGuard<'_, H> {
        self.hardware.lock()
    }
}

/// The system shutdown policy shared by all PPU drivers: everything but warm reset is accepted,
/// with the hardware left for the shutdown itself to power off.
pub fn shutdown_policy(name: &str, kind: SystemShutdown) -> Result<(), PowerError> {
    match kind {
        SystemShutdown::WarmReset => {
            error!("{name}: warm reset is not supported");
            Err(PowerError::Unsupported)
        }
        SystemShutdown::Shutdown | SystemShutdown::ColdReset => Ok(()),
    }
}
