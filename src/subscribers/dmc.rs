// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! DDR memory controller support across system suspend.
//!
//! Before the domain holding the memory controller powers down, the DRAM is put into self-refresh
//! and the PHYs into retention. After the domain comes back, the controller is reinitialised and
//! woken up. The driver only listens for one phase at a time: PRE while memory is live, POST while
//! it is retained.

use crate::{
    error::PowerError,
    interrupt::{IntId, InterruptController},
    power_domain::{
        NodeId, Phase, PostTransitionNotification, PowerDomainManager, PreTransitionNotification,
        PreTransitionResponse, SubscriberId, Subscriptions, TransitionSubscriber,
    },
    power_state::PowerState,
    timer::Timer,
};
use log::{debug, error};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use safe_mmio::{
    UniqueMmioPointer, field, field_shared,
    fields::{ReadPure, ReadPureWrite, WriteOnly},
};
use spin::mutex::SpinMutex;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// How long to wait for the controller to accept a command.
pub const DMC_TIMEOUT_US: u32 = 1000 * 1000;

/// How long to wait for the PHYs to go idle.
pub const PHY_IDLE_TIMEOUT_US: u32 = 1000;

const MEMC_STATUS_MASK: u32 = 0x3;

/// All PHY status bits except this one must be clear for the PHY to be idle.
const PHY_STATUS_IDLE_MASK: u32 = 0xffff_f7ff;

const PHY_RETENTION_ENABLE: u32 = 1;
const PHY_RETENTION_DISABLE: u32 = 0;

/// A controller command, which is also the status the controller reports once it has been
/// carried out.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum MemcCommand {
    /// Accept configuration writes.
    Config = 0,
    /// Put the DRAM into self-refresh.
    Sleep = 1,
    /// Start serving memory accesses.
    Go = 3,
}

/// Access to a memory controller and its PHYs.
pub trait DmcHardware: Send {
    /// Issues a command to the controller.
    fn command(&mut self, command: MemcCommand);

    /// Reads the raw controller status register.
    fn status(&mut self) -> u32;

    /// Returns whether every PHY is idle.
    fn phys_idle(&mut self) -> bool;

    /// Enables or disables retention of the PHY pads.
    fn set_phy_retention(&mut self, enable: bool);

    /// Brings the PHYs out of retention and reprograms the controller after a power loss.
    fn initialise(&mut self) -> Result<(), PowerError>;
}

/// The controller registers used for power management.
#[derive(Clone, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C, align(4))]
pub struct DmcRegisters {
    /// The state the controller is in.
    pub memc_status: ReadPure<u32>,
    /// Controller configuration.
    pub memc_config: ReadPureWrite<u32>,
    /// Command register.
    pub memc_cmd: WriteOnly<u32>,
}

/// The start of the PTM register block of a DDR PHY.
#[derive(Clone, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C, align(4))]
pub struct PhyRegisters {
    reserved: [u32; 5],
    /// PHY status.
    pub phy_status: ReadPure<u32>,
}

/// The retention controls of both DDR PHYs, in the system configuration block.
#[derive(Clone, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C, align(4))]
pub struct PhyRetentionRegisters {
    /// Retention control of the first PHY.
    pub phy0_retention: ReadPureWrite<u32>,
    /// Retention control of the second PHY.
    pub phy1_retention: ReadPureWrite<u32>,
}

/// A memory-mapped controller with two PHYs.
pub struct MmioDmc<'a> {
    dmc: UniqueMmioPointer<'a, DmcRegisters>,
    phys: [UniqueMmioPointer<'a, PhyRegisters>; 2],
    retention: UniqueMmioPointer<'a, PhyRetentionRegisters>,
}

impl<'a> MmioDmc<'a> {
    /// Creates a driver for the controller and PHYs with the given registers.
    pub fn new(
        dmc: UniqueMmioPointer<'a, DmcRegisters>,
        phys: [UniqueMmioPointer<'a, PhyRegisters>; 2],
        retention: UniqueMmioPointer<'a, PhyRetentionRegisters>,
    ) -> Self {
        Self {
            dmc,
            phys,
            retention,
        }
    }
}

impl DmcHardware for MmioDmc<'_> {
    fn command(&mut self, command: MemcCommand) {
        field!(self.dmc, memc_cmd).write(command.into());
    }

    fn status(&mut self) -> u32 {
        field_shared!(self.dmc, memc_status).read()
    }

    fn phys_idle(&mut self) -> bool {
        self.phys
            .iter()
            .all(|phy| field_shared!(*phy, phy_status).read() & PHY_STATUS_IDLE_MASK == 0)
    }

    fn set_phy_retention(&mut self, enable: bool) {
        let value = if enable {
            PHY_RETENTION_ENABLE
        } else {
            PHY_RETENTION_DISABLE
        };
        field!(self.retention, phy0_retention).write(value);
        field!(self.retention, phy1_retention).write(value);
    }

    fn initialise(&mut self) -> Result<(), PowerError> {
        self.set_phy_retention(false);
        self.command(MemcCommand::Config);
        Ok(())
    }
}

/// Keeps DRAM contents alive while the domain of its controller is powered down.
pub struct Dmc<'a, H: DmcHardware> {
    node: NodeId,
    hardware: SpinMutex<H>,
    timer: &'a dyn Timer,
    interrupts: &'a dyn InterruptController,
    training_irq: IntId,
}

impl<'a, H: DmcHardware + 'a> Dmc<'a, H> {
    /// Creates the driver for a controller in the domain of `node`.
    ///
    /// `training_irq` is the PHY training interrupt, which must be masked while the PHYs are in
    /// retention.
    pub fn new(
        node: NodeId,
        hardware: H,
        timer: &'a dyn Timer,
        interrupts: &'a dyn InterruptController,
        training_irq: IntId,
    ) -> Self {
        Self {
            node,
            hardware: SpinMutex::new(hardware),
            timer,
            interrupts,
            training_irq,
        }
    }

    /// Adds the driver to `manager`, listening for the PRE phase of its domain.
    pub fn register(
        &'a self,
        manager: &mut PowerDomainManager<'a>,
    ) -> Result<SubscriberId, PowerError> {
        let id = manager.add_subscriber(self)?;
        manager.subscribe(id, self.node, Phase::Pre)?;
        Ok(id)
    }

    fn wait_for(&self, hardware: &mut H, state: MemcCommand) -> Result<(), PowerError> {
        let expected = u32::from(state);
        self.timer.wait(DMC_TIMEOUT_US, &mut || {
            (hardware.status() & MEMC_STATUS_MASK) == expected
        })
    }

    fn suspend(&self) -> Result<(), PowerError> {
        self.interrupts.disable(self.training_irq)?;

        let mut hardware = self.hardware.lock();
        hardware.command(MemcCommand::Sleep);
        self.wait_for(&mut hardware, MemcCommand::Sleep)?;
        self.timer
            .wait(PHY_IDLE_TIMEOUT_US, &mut || hardware.phys_idle())?;
        hardware.set_phy_retention(true);
        Ok(())
    }

    fn resume(&self) -> Result<(), PowerError> {
        {
            let mut hardware = self.hardware.lock();
            hardware.initialise()?;
            hardware.command(MemcCommand::Sleep);
            self.wait_for(&mut hardware, MemcCommand::Sleep)?;
            hardware.command(MemcCommand::Go);
            self.wait_for(&mut hardware, MemcCommand::Go)?;
        }

        self.interrupts.clear_pending(self.training_irq)?;
        self.interrupts.enable(self.training_irq)
    }

    fn swap(
        &self,
        subscriptions: &mut Subscriptions,
        from: Phase,
        to: Phase,
    ) -> Result<(), PowerError> {
        subscriptions.unsubscribe(self.node, from)?;
        subscriptions.subscribe(self.node, to)
    }
}

impl<'a, H: DmcHardware + 'a> TransitionSubscriber for Dmc<'a, H> {
    fn on_pre_transition(
        &self,
        notification: &PreTransitionNotification,
        subscriptions: &mut Subscriptions,
    ) -> PreTransitionResponse {
        if notification.node != self.node
            || !matches!(
                notification.target_state,
                PowerState::Off | PowerState::SystemSleep0
            )
        {
            return PreTransitionResponse::Success;
        }

        match self
            .suspend()
            .and_then(|()| self.swap(subscriptions, Phase::Pre, Phase::Post))
        {
            Ok(()) => {
                debug!("DRAM in self-refresh");
                PreTransitionResponse::Success
            }
            Err(e) => {
                error!("Failed to put DRAM into self-refresh: {e}");
                PreTransitionResponse::Failure
            }
        }
    }

    fn on_post_transition(
        &self,
        notification: &PostTransitionNotification,
        subscriptions: &mut Subscriptions,
    ) {
        if notification.node != self.node || notification.state != PowerState::On {
            return;
        }

        match self
            .resume()
            .and_then(|()| self.swap(subscriptions, Phase::Post, Phase::Pre))
        {
            Ok(()) => debug!("DRAM resumed"),
            Err(e) => error!("Failed to resume DRAM: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::test::{CLUSTER0, SYSTOP, TestSystem},
        power_domain::{
            RequestStatus,
            notification::{Broadcaster, Topic},
        },
    };

    const TRAINING_IRQ: IntId = 60;

    struct FakeDmc {
        commands: Vec<MemcCommand>,
        status: u32,
        responsive: bool,
        retention: bool,
        initialised: usize,
    }

    impl FakeDmc {
        fn new(responsive: bool) -> Self {
            Self {
                commands: Vec::new(),
                status: MemcCommand::Go.into(),
                responsive,
                retention: false,
                initialised: 0,
            }
        }
    }

    impl DmcHardware for FakeDmc {
        fn command(&mut self, command: MemcCommand) {
            self.commands.push(command);
            if self.responsive {
                self.status = command.into();
            }
        }

        fn status(&mut self) -> u32 {
            self.status
        }

        fn phys_idle(&mut self) -> bool {
            true
        }

        fn set_phy_retention(&mut self, enable: bool) {
            self.retention = enable;
        }

        fn initialise(&mut self) -> Result<(), PowerError> {
            self.initialised += 1;
            self.retention = false;
            Ok(())
        }
    }

    fn dmc(system: &TestSystem, responsive: bool) -> &'static Dmc<'static, FakeDmc> {
        system.interrupts.enable(TRAINING_IRQ).unwrap();
        Box::leak(Box::new(Dmc::new(
            SYSTOP,
            FakeDmc::new(responsive),
            system.timer,
            system.interrupts,
            TRAINING_IRQ,
        )))
    }

    #[test]
    fn suspend_and_resume() {
        let system = TestSystem::new();
        let mut manager = system.manager();
        let dmc = dmc(&system, true);
        dmc.register(&mut manager).unwrap();

        assert_eq!(
            manager.request_state(CLUSTER0, PowerState::Off),
            Ok(RequestStatus::Done)
        );
        assert!(dmc.hardware.lock().commands.is_empty());

        assert_eq!(
            manager.request_state(SYSTOP, PowerState::SystemSleep0),
            Ok(RequestStatus::Done)
        );
        {
            let hardware = dmc.hardware.lock();
            assert_eq!(hardware.commands, [MemcCommand::Sleep]);
            assert!(hardware.retention);
        }
        assert!(!system.interrupts.is_enabled(TRAINING_IRQ).unwrap());

        assert_eq!(
            manager.request_state(SYSTOP, PowerState::On),
            Ok(RequestStatus::Done)
        );
        {
            let hardware = dmc.hardware.lock();
            assert_eq!(
                hardware.commands,
                [MemcCommand::Sleep, MemcCommand::Sleep, MemcCommand::Go]
            );
            assert_eq!(hardware.initialised, 1);
            assert!(!hardware.retention);
        }
        assert!(system.interrupts.is_enabled(TRAINING_IRQ).unwrap());

        // Back to listening for PRE.
        assert_eq!(
            manager.request_state(SYSTOP, PowerState::SystemSleep0),
            Ok(RequestStatus::Done)
        );
        assert_eq!(dmc.hardware.lock().commands.len(), 4);
    }

    #[test]
    fn unresponsive_controller_refuses_suspend() {
        let system = TestSystem::new();
        let mut manager = system.manager();
        let dmc = dmc(&system, false);
        dmc.register(&mut manager).unwrap();
        manager.request_state(CLUSTER0, PowerState::Off).unwrap();

        assert_eq!(
            manager.request_state(SYSTOP, PowerState::SystemSleep0),
            Err(PowerError::Denied)
        );
        assert_eq!(manager.get_state(SYSTOP), Ok(PowerState::On));
        assert!(!dmc.hardware.lock().retention);
    }

    #[test]
    fn post_without_suspend() {
        let system = TestSystem::new();
        let dmc = dmc(&system, true);
        let mut broadcaster = Broadcaster::new();
        let id = broadcaster.add_subscriber(dmc).unwrap();
        let mut subscriptions = broadcaster.subscriptions(id).unwrap();
        subscriptions.subscribe(SYSTOP, Phase::Pre).unwrap();

        dmc.on_post_transition(
            &PostTransitionNotification {
                node: SYSTOP,
                previous_state: PowerState::SystemSleep0,
                state: PowerState::On,
            },
            &mut subscriptions,
        );
        // Without a POST subscription to swap, the PRE one is kept.
        assert!(subscriptions.is_subscribed(Topic::Transition(SYSTOP, Phase::Pre)));
        assert_eq!(dmc.hardware.lock().initialised, 1);

        dmc.on_post_transition(
            &PostTransitionNotification {
                node: CLUSTER0,
                previous_state: PowerState::Off,
                state: PowerState::On,
            },
            &mut subscriptions,
        );
        assert_eq!(dmc.hardware.lock().initialised, 1);
    }
}
