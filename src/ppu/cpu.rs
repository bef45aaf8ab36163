// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Driver for the PPU of a single processor core.
//!
//! Besides switching the PPU mode, the core driver owns the core's wakeup and warm reset interrupt
//! lines. They are only enabled while the core is in a state where the interrupt has a meaning, so
//! an interrupt can never arrive for a core which is not expecting it.

use super::{Ppu, PpuHardware, PpuMode, shutdown_policy};
use crate::{
    driver::PowerDomainDriver,
    error::PowerError,
    event::Event,
    interrupt::{IntId, InterruptController},
    power_domain::NodeId,
    power_state::{PowerState, SystemShutdown},
    timer::Alarm,
};
use log::{debug, warn};
use spin::mutex::SpinMutex;

/// How often to check the hardware while waiting for a core to power off before system suspend.
pub const SUSPEND_POLL_PERIOD_US: u32 = 100;

/// The interrupt lines associated with a core.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CoreInterrupts {
    /// Wakeup request for a sleeping core, IRQ.
    pub wakeup_irq: IntId,
    /// Wakeup request for a sleeping core, FIQ.
    pub wakeup_fiq: IntId,
    /// Request from the core to be warm reset.
    pub warm_reset_irq: IntId,
}

/// Driver for a core power domain.
pub struct CorePpu<'a, H: PpuHardware> {
    ppu: Ppu<'a, H>,
    interrupts: &'a dyn InterruptController,
    lines: CoreInterrupts,
    alarm: Option<&'a dyn Alarm>,
    /// The mode the alarm is waiting for, while a suspend is in progress.
    awaited_mode: SpinMutex<Option<PpuMode>>,
}

impl<'a, H: PpuHardware> CorePpu<'a, H> {
    /// Creates a core driver. Without an alarm the core can't take part in system suspend.
    pub fn new(
        ppu: Ppu<'a, H>,
        interrupts: &'a dyn InterruptController,
        lines: CoreInterrupts,
        alarm: Option<&'a dyn Alarm>,
    ) -> Self {
        Self {
            ppu,
            interrupts,
            lines,
            alarm,
            awaited_mode: SpinMutex::new(None),
        }
    }

    /// Returns the shared PPU context.
    pub fn ppu(&self) -> &Ppu<'a, H> {
        &self.ppu
    }

    /// Returns the interrupt lines of the core.
    pub fn lines(&self) -> CoreInterrupts {
        self.lines
    }

    fn enable_wakeup(&self) -> Result<(), PowerError> {
        self.interrupts.clear_pending(self.lines.wakeup_irq)?;
        self.interrupts.enable(self.lines.wakeup_irq)?;
        self.interrupts.clear_pending(self.lines.wakeup_fiq)?;
        self.interrupts.enable(self.lines.wakeup_fiq)
    }

    fn disable_wakeup(&self) -> Result<(), PowerError> {
        self.interrupts.disable(self.lines.wakeup_irq)?;
        self.interrupts.disable(self.lines.wakeup_fiq)
    }

    fn enable_warm_reset(&self) -> Result<(), PowerError> {
        self.interrupts.clear_pending(self.lines.warm_reset_irq)?;
        self.interrupts.enable(self.lines.warm_reset_irq)
    }

    /// Interrupt handler for the wakeup IRQ and FIQ.
    ///
    /// Masks both wakeup lines and leaves the power up to the event loop.
    pub fn handle_wakeup_interrupt(&self) -> Result<(), PowerError> {
        self.disable_wakeup()?;
        self.ppu.post(|node| Event::CoreWakeup { node })
    }

    /// Interrupt handler for the warm reset request.
    pub fn handle_warm_reset_interrupt(&self) -> Result<(), PowerError> {
        self.interrupts.disable(self.lines.warm_reset_irq)?;
        self.ppu.post(|node| Event::WarmResetRequest { node })
    }
}

impl<H: PpuHardware> PowerDomainDriver for CorePpu<'_, H> {
    fn bind(&self, node: NodeId) -> Result<(), PowerError> {
        self.ppu.bind(node)
    }

    fn set_state(&self, state: PowerState) -> Result<(), PowerError> {
        match state {
            PowerState::Off => {
                self.disable_wakeup()?;
                self.interrupts.disable(self.lines.warm_reset_irq)?;
                self.ppu.set_mode_and_wait(PpuMode::Off)?;
            }
            PowerState::Sleep => {
                self.interrupts.disable(self.lines.warm_reset_irq)?;
                self.ppu.set_mode_and_wait(PpuMode::Off)?;
                self.enable_wakeup()?;
            }
            PowerState::On => {
                self.disable_wakeup()?;
                self.ppu.set_mode_and_wait(PpuMode::On)?;
                self.enable_warm_reset()?;
            }
            PowerState::MemRetention | PowerState::WarmReset | PowerState::SystemSleep0 => {
                return Err(PowerError::Unsupported);
            }
        }
        self.ppu.report(state)
    }

    fn get_state(&self) -> Result<PowerState, PowerError> {
        let state = self.ppu.mode()?.power_state();
        if state == PowerState::Off && self.interrupts.is_enabled(self.lines.wakeup_irq)? {
            Ok(PowerState::Sleep)
        } else {
            Ok(state)
        }
    }

    fn reset(&self) -> Result<(), PowerError> {
        self.ppu.warm_reset()?;
        self.enable_warm_reset()
    }

    fn shutdown(&self, kind: SystemShutdown) -> Result<(), PowerError> {
        shutdown_policy(self.ppu.name(), kind)
    }

    fn prepare_for_suspend(&self) -> Result<(), PowerError> {
        let Some(alarm) = self.alarm else {
            warn!("{}: no alarm to complete suspend", self.ppu.name());
            return Err(PowerError::Unsupported);
        };
        let node = self.ppu.node().ok_or(PowerError::InvalidParam)?;
        self.disable_wakeup()?;
        self.interrupts.disable(self.lines.warm_reset_irq)?;
        // The core turns itself off once it executes WFI with its clock gone, so the request can't
        // be waited for here.
        self.ppu.request_mode(PpuMode::Off);
        *self.awaited_mode.lock() = Some(PpuMode::Off);
        alarm.start_periodic(SUSPEND_POLL_PERIOD_US, node)
    }

    fn process_alarm(&self) -> Result<(), PowerError> {
        let mut awaited_mode = self.awaited_mode.lock();
        let Some(mode) = *awaited_mode else {
            return Ok(());
        };
        if self.ppu.mode()? != mode {
            return Ok(());
        }
        *awaited_mode = None;
        if let Some(alarm) = self.alarm {
            alarm.stop();
        }
        debug!("{}: reached {mode:?} for suspend", self.ppu.name());
        self.ppu.report(mode.power_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::EventQueue,
        platform::test::{FakeAlarm, FakeInterrupts, FakePpu, FakeTimer, Latency},
    };

    const LINES: CoreInterrupts = CoreInterrupts {
        wakeup_irq: 10,
        wakeup_fiq: 11,
        warm_reset_irq: 12,
    };

    fn fixtures() -> (EventQueue, FakeInterrupts, FakeTimer) {
        (EventQueue::new(), FakeInterrupts::new(), FakeTimer::new())
    }

    fn core_ppu<'a>(
        events: &'a EventQueue,
        interrupts: &'a FakeInterrupts,
        timer: &'a FakeTimer,
        alarm: Option<&'a dyn Alarm>,
    ) -> CorePpu<'a, FakePpu> {
        let ppu = Ppu::new("core", FakePpu::new(PpuMode::Off), Some(timer), events);
        let core = CorePpu::new(ppu, interrupts, LINES, alarm);
        core.bind(NodeId(0)).unwrap();
        core
    }

    #[test]
    fn on_enables_warm_reset_only() {
        let (events, interrupts, timer) = fixtures();
        let core = core_ppu(&events, &interrupts, &timer, None);
        interrupts.enable(LINES.wakeup_irq).unwrap();

        core.set_state(PowerState::On).unwrap();
        assert_eq!(core.get_state(), Ok(PowerState::On));
        assert!(!interrupts.is_enabled(LINES.wakeup_irq).unwrap());
        assert!(!interrupts.is_enabled(LINES.wakeup_fiq).unwrap());
        assert!(interrupts.is_enabled(LINES.warm_reset_irq).unwrap());
        assert_eq!(
            events.pop(),
            Some(Event::TransitionReport {
                node: NodeId(0),
                state: PowerState::On
            })
        );
    }

    #[test]
    fn sleep_enables_wakeup() {
        let (events, interrupts, timer) = fixtures();
        let core = core_ppu(&events, &interrupts, &timer, None);
        core.set_state(PowerState::On).unwrap();

        core.set_state(PowerState::Sleep).unwrap();
        assert_eq!(core.get_state(), Ok(PowerState::Sleep));
        assert!(interrupts.is_enabled(LINES.wakeup_irq).unwrap());
        assert!(interrupts.is_enabled(LINES.wakeup_fiq).unwrap());
        assert!(!interrupts.is_enabled(LINES.warm_reset_irq).unwrap());

        core.set_state(PowerState::Off).unwrap();
        assert_eq!(core.get_state(), Ok(PowerState::Off));
        assert!(!interrupts.is_enabled(LINES.wakeup_irq).unwrap());
    }

    #[test]
    fn unsupported_states() {
        let (events, interrupts, timer) = fixtures();
        let core = core_ppu(&events, &interrupts, &timer, None);
        assert_eq!(
            core.set_state(PowerState::MemRetention),
            Err(PowerError::Unsupported)
        );
        assert_eq!(core.ppu().hardware().writes(), 0);
        assert!(events.is_empty());
    }

    #[test]
    fn timeout_is_not_reported() {
        let (events, interrupts, timer) = fixtures();
        let core = core_ppu(&events, &interrupts, &timer, None);
        core.ppu().hardware().set_latency(Latency::Never);
        assert_eq!(core.set_state(PowerState::On), Err(PowerError::DeviceError));
        assert!(events.is_empty());
        assert!(!interrupts.is_enabled(LINES.warm_reset_irq).unwrap());
    }

    #[test]
    fn wakeup_interrupt_posts_event() {
        let (events, interrupts, timer) = fixtures();
        let core = core_ppu(&events, &interrupts, &timer, None);
        core.set_state(PowerState::Sleep).unwrap();
        events.pop();

        core.handle_wakeup_interrupt().unwrap();
        assert!(!interrupts.is_enabled(LINES.wakeup_irq).unwrap());
        assert_eq!(events.pop(), Some(Event::CoreWakeup { node: NodeId(0) }));
        // The hardware is left alone.
        assert_eq!(core.ppu().mode(), Ok(PpuMode::Off));
    }

    #[test]
    fn warm_reset() {
        let (events, interrupts, timer) = fixtures();
        let core = core_ppu(&events, &interrupts, &timer, None);
        core.set_state(PowerState::On).unwrap();
        events.pop();

        core.handle_warm_reset_interrupt().unwrap();
        assert!(!interrupts.is_enabled(LINES.warm_reset_irq).unwrap());
        assert_eq!(events.pop(), Some(Event::WarmResetRequest { node: NodeId(0) }));

        core.reset().unwrap();
        assert_eq!(core.ppu().mode(), Ok(PpuMode::On));
        assert_eq!(
            core.ppu().hardware().policy_history(),
            [PpuMode::On, PpuMode::WarmReset, PpuMode::On]
        );
        assert!(interrupts.is_enabled(LINES.warm_reset_irq).unwrap());
    }

    #[test]
    fn suspend_completes_from_alarm() {
        let (events, interrupts, timer) = fixtures();
        let alarm = FakeAlarm::new(&events);
        let core = core_ppu(&events, &interrupts, &timer, Some(&alarm));
        core.set_state(PowerState::On).unwrap();
        events.pop();
        core.ppu().hardware().set_latency(Latency::Never);

        core.prepare_for_suspend().unwrap();
        assert!(!interrupts.is_enabled(LINES.warm_reset_irq).unwrap());
        assert!(alarm.is_running());

        // Still on, so nothing is reported.
        core.process_alarm().unwrap();
        assert!(events.is_empty());

        core.ppu().hardware().converge();
        core.process_alarm().unwrap();
        assert!(!alarm.is_running());
        assert_eq!(
            events.pop(),
            Some(Event::TransitionReport {
                node: NodeId(0),
                state: PowerState::Off
            })
        );
        core.process_alarm().unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn suspend_needs_alarm() {
        let (events, interrupts, timer) = fixtures();
        let core = core_ppu(&events, &interrupts, &timer, None);
        assert_eq!(core.prepare_for_suspend(), Err(PowerError::Unsupported));
    }
}
