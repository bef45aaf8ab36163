// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Minimal PPU driver for the ROM firmware, which runs before the power domain manager exists.

use super::{Ppu, PpuHardware, PpuMode, shutdown_policy};
use crate::{
    driver::PowerDomainDriver,
    error::PowerError,
    power_domain::NodeId,
    power_state::{PowerState, SystemShutdown},
    timer::Timer,
};
use log::debug;

/// Driver which switches a PPU synchronously and never reports to an event loop.
///
/// When bound into a [`PowerDomainManager`](crate::power_domain::PowerDomainManager), the manager
/// records each state itself once `set_state` returns.
pub struct RomPpu<'a, H: PpuHardware> {
    ppu: Ppu<'a, H>,
}

impl<'a, H: PpuHardware> RomPpu<'a, H> {
    /// Creates a ROM driver. Without a timer, waits spin with no timeout.
    pub fn new(name: &'static str, hardware: H, timer: Option<&'a dyn Timer>) -> Self {
        Self {
            ppu: Ppu::unreported(name, hardware, timer),
        }
    }

    /// Moves the domain to `state` and waits until the hardware gets there.
    pub fn set_state_and_wait(&self, state: PowerState) -> Result<(), PowerError> {
        let mode = match state {
            PowerState::On => PpuMode::On,
            PowerState::Off => PpuMode::Off,
            _ => return Err(PowerError::InvalidParam),
        };
        debug!("{}: {state}", self.ppu.name());
        self.ppu.set_mode_and_wait(mode)
    }

    /// Returns the state of the domain.
    pub fn get_state(&self) -> Result<PowerState, PowerError> {
        Ok(self.ppu.mode()?.power_state())
    }
}

impl<H: PpuHardware> PowerDomainDriver for RomPpu<'_, H> {
    fn bind(&self, node: NodeId) -> Result<(), PowerError> {
        self.ppu.bind(node)
    }

    fn set_state(&self, state: PowerState) -> Result<(), PowerError> {
        self.set_state_and_wait(state)
    }

    fn get_state(&self) -> Result<PowerState, PowerError> {
        RomPpu::get_state(self)
    }

    fn reset(&self) -> Result<(), PowerError> {
        self.ppu.warm_reset()
    }

    fn shutdown(&self, kind: SystemShutdown) -> Result<(), PowerError> {
        shutdown_policy(self.ppu.name(), kind)
    }

    fn reports_transitions(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::test::{DEBUGSYS, FakePpu, FakeTimer, Latency, TEST_POWER_DOMAINS, TestSystem},
        power_domain::{PowerDomainManager, RequestStatus, TransitionPhase},
    };

    #[test]
    fn set_state_and_wait() {
        let timer = FakeTimer::new();
        let rom = RomPpu::new("systop", FakePpu::new(PpuMode::Off), Some(&timer));
        rom.set_state_and_wait(PowerState::On).unwrap();
        assert_eq!(rom.get_state(), Ok(PowerState::On));
        assert_eq!(
            rom.set_state_and_wait(PowerState::Sleep),
            Err(PowerError::InvalidParam)
        );
    }

    #[test]
    fn timeout() {
        let timer = FakeTimer::new();
        let rom = RomPpu::new("systop", FakePpu::new(PpuMode::On), Some(&timer));
        rom.ppu.hardware().set_latency(Latency::Never);
        assert_eq!(
            rom.set_state_and_wait(PowerState::Off),
            Err(PowerError::DeviceError)
        );
        assert_eq!(rom.get_state(), Ok(PowerState::On));
    }

    #[test]
    fn driven_by_the_manager() {
        let system = TestSystem::new();
        let rom: &'static RomPpu<'static, FakePpu> = Box::leak(Box::new(RomPpu::new(
            "dbgsys",
            FakePpu::new(PpuMode::Off),
            Some(system.timer),
        )));
        let mut drivers = system.drivers();
        drivers[DEBUGSYS.0] = rom;
        let mut manager =
            PowerDomainManager::new(TEST_POWER_DOMAINS, &drivers, system.events).unwrap();

        assert_eq!(
            manager.request_state(DEBUGSYS, PowerState::On),
            Ok(RequestStatus::Done)
        );
        assert_eq!(manager.get_state(DEBUGSYS), Ok(PowerState::On));
        assert_eq!(manager.phase(DEBUGSYS), Ok(TransitionPhase::Idle));
        assert_eq!(rom.get_state(), Ok(PowerState::On));

        assert_eq!(
            manager.request_state(DEBUGSYS, PowerState::Off),
            Ok(RequestStatus::Done)
        );
        assert_eq!(manager.get_state(DEBUGSYS), Ok(PowerState::Off));
        assert!(system.events.is_empty());
    }
}
