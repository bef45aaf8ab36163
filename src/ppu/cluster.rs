// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Driver for the PPU of a cluster of cores.
//!
//! A cluster holds the debug logic of its cores, so it must stay powered while the debug domain is
//! on. OFF is refused outright in that case, and SLEEP is emulated: the hardware stays on while the
//! rest of the system sees the cluster as sleeping.

use super::{Ppu, PpuHardware, PpuMode, shutdown_policy};
use crate::{
    driver::PowerDomainDriver,
    error::PowerError,
    power_domain::NodeId,
    power_state::{PowerState, SystemShutdown},
};
use core::sync::atomic::{AtomicBool, Ordering};
use log::{info, warn};

/// Driver for a cluster power domain.
pub struct ClusterPpu<'a, H: PpuHardware> {
    ppu: Ppu<'a, H>,
    debug: Option<&'a dyn PowerDomainDriver>,
    emulated_sleep: AtomicBool,
}

impl<'a, H: PpuHardware> ClusterPpu<'a, H> {
    /// Creates a cluster driver. `debug` is the driver of the debug domain which needs the cluster
    /// to stay powered, if there is one.
    pub fn new(ppu: Ppu<'a, H>, debug: Option<&'a dyn PowerDomainDriver>) -> Self {
        Self {
            ppu,
            debug,
            emulated_sleep: AtomicBool::new(false),
        }
    }

    /// Returns the shared PPU context.
    pub fn ppu(&self) -> &Ppu<'a, H> {
        &self.ppu
    }

    /// Returns whether the cluster is on but pretending to sleep.
    pub fn is_sleep_emulated(&self) -> bool {
        self.emulated_sleep.load(Ordering::Acquire)
    }

    fn debug_is_on(&self) -> bool {
        self.debug
            .is_some_and(|debug| debug.get_state() == Ok(PowerState::On))
    }
}

impl<H: PpuHardware> PowerDomainDriver for ClusterPpu<'_, H> {
    fn bind(&self, node: NodeId) -> Result<(), PowerError> {
        self.ppu.bind(node)
    }

    fn set_state(&self, state: PowerState) -> Result<(), PowerError> {
        match state {
            PowerState::On => {
                self.ppu.set_mode_and_wait(PpuMode::On)?;
                self.emulated_sleep.store(false, Ordering::Release);
            }
            PowerState::Off => {
                if self.debug_is_on() {
                    warn!("{}: debug is on, refusing OFF", self.ppu.name());
                    return Err(PowerError::Denied);
                }
                self.ppu.set_mode_and_wait(PpuMode::Off)?;
                self.emulated_sleep.store(false, Ordering::Release);
            }
            PowerState::Sleep if self.debug_is_on() => {
                if self.ppu.mode()? != PpuMode::On {
                    self.ppu.set_mode_and_wait(PpuMode::On)?;
                }
                info!("{}: emulating SLEEP while debug is on", self.ppu.name());
                self.emulated_sleep.store(true, Ordering::Release);
            }
            PowerState::Sleep => {
                self.ppu.set_mode_and_wait(PpuMode::Off)?;
                self.emulated_sleep.store(false, Ordering::Release);
            }
            PowerState::MemRetention | PowerState::WarmReset | PowerState::SystemSleep0 => {
                return Err(PowerError::Unsupported);
            }
        }
        self.ppu.report(state)
    }

    fn get_state(&self) -> Result<PowerState, PowerError> {
        let state = self.ppu.mode()?.power_state();
        if state == PowerState::On && self.is_sleep_emulated() {
            Ok(PowerState::Sleep)
        } else {
            Ok(state)
        }
    }

    fn reset(&self) -> Result<(), PowerError> {
        self.ppu.warm_reset()?;
        self.emulated_sleep.store(false, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self, kind: SystemShutdown) -> Result<(), PowerError> {
        shutdown_policy(self.ppu.name(), kind)
    }

    fn deny(&self, state: PowerState) -> bool {
        state == PowerState::Off && self.debug_is_on()
    }
}
