// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Driver for top-level device domains and the debug domain, which are simply on or off.

use super::{Ppu, PpuHardware, PpuMode, shutdown_policy};
use crate::{
    driver::PowerDomainDriver,
    error::PowerError,
    power_domain::NodeId,
    power_state::{PowerState, SystemShutdown},
};

/// Driver for a device or debug power domain.
pub struct DevicePpu<'a, H: PpuHardware> {
    ppu: Ppu<'a, H>,
}

impl<'a, H: PpuHardware> DevicePpu<'a, H> {
    /// Creates a device driver.
    pub fn new(ppu: Ppu<'a, H>) -> Self {
        Self { ppu }
    }

    /// Returns the shared PPU context.
    pub fn ppu(&self) -> &Ppu<'a, H> {
        &self.ppu
    }
}

impl<H: PpuHardware> PowerDomainDriver for DevicePpu<'_, H> {
    fn bind(&self, node: NodeId) -> Result<(), PowerError> {
        self.ppu.bind(node)
    }

    fn set_state(&self, state: PowerState) -> Result<(), PowerError> {
        let mode = match state {
            PowerState::On => PpuMode::On,
            PowerState::Off => PpuMode::Off,
            _ => return Err(PowerError::Unsupported),
        };
        self.ppu.set_mode_and_wait(mode)?;
        self.ppu.report(state)
    }

    fn get_state(&self) -> Result<PowerState, PowerError> {
        Ok(self.ppu.mode()?.power_state())
    }

    fn reset(&self) -> Result<(), PowerError> {
        self.ppu.warm_reset()
    }

    fn shutdown(&self, kind: SystemShutdown) -> Result<(), PowerError> {
        shutdown_policy(self.ppu.name(), kind)
    }
}
