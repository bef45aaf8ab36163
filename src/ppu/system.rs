// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Driver for the PPU of the system top, the root of the power domain tree.

use super::{Ppu, PpuHardware, PpuMode, shutdown_policy};
use crate::{
    driver::PowerDomainDriver,
    error::PowerError,
    power_domain::NodeId,
    power_state::{PowerState, SystemShutdown},
};
use log::info;

/// Driver for the system top power domain.
///
/// System suspend keeps the system top in memory retention, which is reported as
/// [`PowerState::SystemSleep0`].
pub struct SystemPpu<'a, H: PpuHardware> {
    ppu: Ppu<'a, H>,
}

impl<'a, H: PpuHardware> SystemPpu<'a, H> {
    /// Creates a system top driver.
    pub fn new(ppu: Ppu<'a, H>) -> Self {
        Self { ppu }
    }

    /// Returns the shared PPU context.
    pub fn ppu(&self) -> &Ppu<'a, H> {
        &self.ppu
    }

    /// Waits for the system top to come up at boot.
    ///
    /// Nothing else can be accessed before this, including any timer, so this spins with no
    /// timeout.
    pub fn wait_for_boot_power_on(&self) {
        if self.ppu.mode() != Ok(PpuMode::On) {
            info!("{}: waiting for power on", self.ppu.name());
            self.ppu.set_mode_and_spin(PpuMode::On);
        }
    }

    fn mode_for(state: PowerState) -> Result<PpuMode, PowerError> {
        match state {
            PowerState::On => Ok(PpuMode::On),
            PowerState::Off => Ok(PpuMode::Off),
            PowerState::SystemSleep0 => Ok(PpuMode::MemRetention),
            PowerState::Sleep | PowerState::MemRetention | PowerState::WarmReset => {
                Err(PowerError::Unsupported)
            }
        }
    }
}

impl<H: PpuHardware> PowerDomainDriver for SystemPpu<'_, H> {
    fn bind(&self, node: NodeId) -> Result<(), PowerError> {
        self.ppu.bind(node)
    }

    fn set_state(&self, state: PowerState) -> Result<(), PowerError> {
        self.ppu.set_mode_and_wait(Self::mode_for(state)?)?;
        self.ppu.report(state)
    }

    fn get_state(&self) -> Result<PowerState, PowerError> {
        Ok(match self.ppu.mode()? {
            PpuMode::MemRetention => PowerState::SystemSleep0,
            mode => mode.power_state(),
        })
    }

    fn reset(&self) -> Result<(), PowerError> {
        self.ppu.warm_reset()
    }

    fn shutdown(&self, kind: SystemShutdown) -> Result<(), PowerError> {
        shutdown_policy(self.ppu.name(), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::EventQueue,
        platform::test::{FakePpu, FakeTimer, Latency},
    };

    #[test]
    fn boot_power_on_spins() {
        let events = EventQueue::new();
        let system = SystemPpu::new(Ppu::new("systop", FakePpu::new(PpuMode::Off), None, &events));
        system.ppu().hardware().set_latency(Latency::AfterPolls(10));
        system.wait_for_boot_power_on();
        assert_eq!(system.get_state(), Ok(PowerState::On));

        // Already on, so nothing is written.
        system.wait_for_boot_power_on();
        assert_eq!(system.ppu().hardware().writes(), 1);
    }

    #[test]
    fn system_sleep_uses_memory_retention() {
        let events = EventQueue::new();
        let timer = FakeTimer::new();
        let system = SystemPpu::new(Ppu::new(
            "systop",
            FakePpu::new(PpuMode::On),
            Some(&timer),
            &events,
        ));
        system.set_state(PowerState::SystemSleep0).unwrap();
        assert_eq!(system.ppu().mode(), Ok(PpuMode::MemRetention));
        assert_eq!(system.get_state(), Ok(PowerState::SystemSleep0));
        system.set_state(PowerState::On).unwrap();
        assert_eq!(system.get_state(), Ok(PowerState::On));
        assert_eq!(system.set_state(PowerState::Sleep), Err(PowerError::Unsupported));
    }
}
