// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The Arm Juno development board, as seen from its System Control Processor.
//!
//! The topology is a system top with a big cluster of two cores, a LITTLE cluster of four cores,
//! the debug domain and the GPU below it.

use super::Platform;
use crate::{
    config::PowerDomainConfig,
    driver::PowerDomainDriver,
    error::PowerError,
    event::EventQueue,
    interrupt::{IntId, Nvic, NvicRegisters},
    logger::{self, LockedWriter},
    power_domain::{NodeId, PowerDomainManager},
    power_state::{PowerDomainType, PowerState, StateMask, TreePosition},
    ppu::{
        MmioPpu, Ppu, PpuRegisters,
        cluster::ClusterPpu,
        cpu::{CoreInterrupts, CorePpu},
        device::DevicePpu,
        system::SystemPpu,
    },
    subscribers::{
        dmc::{Dmc, DmcRegisters, MmioDmc, PhyRegisters, PhyRetentionRegisters},
        soc_clock::{ClockRate, ClockSource, SocClock, SocClockHardware},
    },
    timer::{Alarm, Counter, CounterTimer, PollingAlarm, Timer},
};
use arm_pl011_uart::{PL011Registers, Uart, UniqueMmioPointer};
use core::{hint::spin_loop, ptr::NonNull};
use log::{error, info};
use safe_mmio::{
    field, field_shared,
    fields::{ReadPure, ReadPureWrite},
};
use spin::{Lazy, Once, mutex::SpinMutex};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Base address of the SCP UART.
const PL011_BASE_ADDRESS: NonNull<PL011Registers> = address(0x7ff8_0000);
/// Base address of the NVIC enable and pending registers, in the System Control Space.
const NVIC_BASE_ADDRESS: NonNull<NvicRegisters> = address(0xe000_e100);
/// Base address of the read-only frame of the REFCLK system counter.
const REFCLK_CNTREAD_BASE_ADDRESS: NonNull<CounterRegisters> = address(0x2a80_0000);
const REFCLK_FREQUENCY_HZ: u64 = 50_000_000;

const PPU_BIG_CPU0_BASE: NonNull<PpuRegisters> = address(0x5004_0000);
const PPU_BIG_CPU1_BASE: NonNull<PpuRegisters> = address(0x5004_1000);
const PPU_LITTLE_CPU0_BASE: NonNull<PpuRegisters> = address(0x5004_4000);
const PPU_LITTLE_CPU1_BASE: NonNull<PpuRegisters> = address(0x5004_5000);
const PPU_LITTLE_CPU2_BASE: NonNull<PpuRegisters> = address(0x5004_6000);
const PPU_LITTLE_CPU3_BASE: NonNull<PpuRegisters> = address(0x5004_7000);
const PPU_BIG_SSTOP_BASE: NonNull<PpuRegisters> = address(0x5004_8000);
const PPU_LITTLE_SSTOP_BASE: NonNull<PpuRegisters> = address(0x5004_9000);
const PPU_DBGSYS_BASE: NonNull<PpuRegisters> = address(0x5004_a000);
const PPU_GPUTOP_BASE: NonNull<PpuRegisters> = address(0x5004_b000);
const PPU_SYSTOP_BASE: NonNull<PpuRegisters> = address(0x5004_c000);

/// Base address of the DMC-400 memory controller.
const DMC_BASE: NonNull<DmcRegisters> = address(0x7ffb_0000);
/// Base addresses of the PTM blocks of the two DDR PHYs.
const DDR_PHY0_BASE: NonNull<PhyRegisters> = address(0x7ffc_0000);
const DDR_PHY1_BASE: NonNull<PhyRegisters> = address(0x7ffd_0000);
/// Base address of the system configuration controller.
const SCC_BASE: usize = 0x7fff_0000;
const SCC_CLOCKS: NonNull<SccClockRegisters> = address(SCC_BASE);
const SCC_PHY_RETENTION: NonNull<PhyRetentionRegisters> = address(SCC_BASE + 0xa04);
/// Base address of the clock controls in the SCP configuration block.
const SCP_CONFIG_CLOCKS: NonNull<ScpClockRegisters> = address(0x5000_0100);

const PHY_TRAINING_IRQ: IntId = 104;

const BIG_WAKEUP_IRQ_BASE: IntId = 24;
const LITTLE_WAKEUP_IRQ_BASE: IntId = 32;
const BIG_WARM_RESET_IRQ_BASE: IntId = 58;
const LITTLE_WARM_RESET_IRQ_BASE: IntId = 62;

const BIG_CORE_COUNT: usize = 2;
const LITTLE_CORE_COUNT: usize = 4;
const DOMAIN_COUNT: usize = BIG_CORE_COUNT + LITTLE_CORE_COUNT + 5;

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

const TOP_LEVEL_DEVICE_STATES: [StateMask; PowerState::COUNT] = [
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

const DBGSYS: NodeId = NodeId(8);
const SYSTOP: NodeId = NodeId(10);

const BIG: u8 = 0;
const LITTLE: u8 = 1;
const DEBUG: u8 = 2;
const GPU: u8 = 3;

const fn core(name: &'static str, cluster: u8, index: u8) -> PowerDomainConfig {
    PowerDomainConfig::new(
        name,
        PowerDomainType::Core,
        TreePosition::new(0, 0, 0, cluster, index),
        &CORE_STATES,
    )
}

const fn top_level(
    name: &'static str,
    domain_type: PowerDomainType,
    child: u8,
    states: &'static [StateMask],
) -> PowerDomainConfig {
    PowerDomainConfig::new(name, domain_type, TreePosition::new(1, 0, 0, child, 0), states)
}

/// The power domains of the Juno board, in tree position order.
pub const JUNO_POWER_DOMAINS: &[PowerDomainConfig] = &[
    core("big_cpu0", BIG, 0),
    core("big_cpu1", BIG, 1),
    core("little_cpu0", LITTLE, 0),
    core("little_cpu1", LITTLE, 1),
    core("little_cpu2", LITTLE, 2),
    core("little_cpu3", LITTLE, 3),
    top_level("big_sstop", PowerDomainType::Cluster, BIG, &CLUSTER_STATES),
    top_level("little_sstop", PowerDomainType::Cluster, LITTLE, &CLUSTER_STATES),
    top_level(
        "dbgsys",
        PowerDomainType::DeviceDebug,
        DEBUG,
        &TOP_LEVEL_DEVICE_STATES,
    ),
    top_level("gputop", PowerDomainType::Device, GPU, &TOP_LEVEL_DEVICE_STATES),
    PowerDomainConfig::new(
        "systop",
        PowerDomainType::System,
        TreePosition::new(2, 0, 0, 0, 0),
        &SYSTOP_STATES,
    ),
];

/// The registers of the read-only frame of a memory-mapped system counter.
#[derive(Clone, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C, align(4))]
pub struct CounterRegisters {
    cntcv_low: ReadPure<u32>,
    cntcv_high: ReadPure<u32>,
}

/// A 64-bit memory-mapped system counter.
pub struct MmioCounter<'a> {
    regs: SpinMutex<UniqueMmioPointer<'a, CounterRegisters>>,
    frequency_hz: u64,
}

impl Counter for MmioCounter<'_> {
    fn ticks(&self) -> u64 {
        // Re-read until the high half is stable, in case the low half wrapped in between.
        let regs = self.regs.lock();
        loop {
            let high = field_shared!(regs, cntcv_high).read();
            let low = field_shared!(regs, cntcv_low).read();
            if field_shared!(regs, cntcv_high).read() == high {
                return u64::from(high) << 32 | u64::from(low);
            }
        }
    }

    fn frequency_hz(&self) -> u64 {
        self.frequency_hz
    }
}

/// The SoC clock controls in the system configuration controller.
#[derive(Clone, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C, align(4))]
pub struct SccClockRegisters {
    faxiclk: ReadPureWrite<u32>,
    saxiclk: ReadPureWrite<u32>,
    hdlcdclk: ReadPureWrite<u32>,
    tmif2xclk: ReadPureWrite<u32>,
    tsif2xclk: ReadPureWrite<u32>,
    usbhclk: ReadPureWrite<u32>,
    pcieaclk: ReadPureWrite<u32>,
    pcietlclk: ReadPureWrite<u32>,
    reserved1: u32,
    pxlclk: ReadPureWrite<u32>,
    reserved2: [u32; 50],
    gpr0: ReadPure<u32>,
}

/// The clock controls in the SCP configuration block.
#[derive(Clone, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C, align(4))]
pub struct ScpClockRegisters {
    big_clusterclk_control: ReadPureWrite<u32>,
    cciclk_control: ReadPureWrite<u32>,
    nicscpclk_control: ReadPureWrite<u32>,
    nicperclk_control: ReadPureWrite<u32>,
    spclk_control: ReadPureWrite<u32>,
    gicclk_control: ReadPureWrite<u32>,
    atclk_control: ReadPureWrite<u32>,
    traceclkin_control: ReadPureWrite<u32>,
}

const CLOCK_WAIT_TIMEOUT_US: u32 = 10_000;
const CLOCK_FIELD_MASK: u32 = 0xf;
/// The distance from a field of a clock control register to the field reporting its current
/// value.
const CLOCK_CURRENT_OFFSET: u32 = 4;
const CLKSEL_SHIFT: u32 = 0;
const CLKDIVSYS_SHIFT: u32 = 8;
const CLKSEL_SYSREFCLK: u32 = 0;
const CLKSEL_SYSINCLK: u32 = 1;
/// Set by the boot loader when the TLX clocks must be left alone.
const SCC_GPR0_SKIP_TLX_CLK_SETTING: u32 = 1 << 22;

/// Writes `value` to the field of a clock control register at `shift`, then optionally waits
/// for the hardware to report it as current.
fn set_clock_field(
    mut control: UniqueMmioPointer<'_, ReadPureWrite<u32>>,
    timer: &dyn Timer,
    shift: u32,
    value: u32,
    wait: bool,
) -> Result<(), PowerError> {
    let current = control.read();
    control.write(current & !(CLOCK_FIELD_MASK << shift) | value << shift);
    if !wait {
        return Ok(());
    }
    let current_shift = shift + CLOCK_CURRENT_OFFSET;
    timer.wait(CLOCK_WAIT_TIMEOUT_US, &mut || {
        (control.read() >> current_shift) & CLOCK_FIELD_MASK == value
    })
}

/// The big cluster clock and the system clocks which lose their source with system top.
pub struct JunoClocks<'a> {
    scp: UniqueMmioPointer<'a, ScpClockRegisters>,
    scc: UniqueMmioPointer<'a, SccClockRegisters>,
    timer: &'a dyn Timer,
}

impl SocClockHardware for JunoClocks<'_> {
    fn select_system_sources(&mut self, debug_clocks: bool) -> Result<(), PowerError> {
        fn select(
            control: UniqueMmioPointer<'_, ReadPureWrite<u32>>,
            timer: &dyn Timer,
        ) -> Result<(), PowerError> {
            set_clock_field(control, timer, CLKSEL_SHIFT, CLKSEL_SYSINCLK, true)
        }

        let timer = self.timer;
        select(field!(self.scp, cciclk_control), timer)?;
        select(field!(self.scp, nicscpclk_control), timer)?;
        select(field!(self.scp, nicperclk_control), timer)?;
        select(field!(self.scp, spclk_control), timer)?;
        select(field!(self.scp, gicclk_control), timer)?;
        if debug_clocks {
            select(field!(self.scp, atclk_control), timer)?;
            select(field!(self.scp, traceclkin_control), timer)?;
        }

        select(field!(self.scc, faxiclk), timer)?;
        select(field!(self.scc, saxiclk), timer)?;
        select(field!(self.scc, hdlcdclk), timer)?;
        if field_shared!(self.scc, gpr0).read() & SCC_GPR0_SKIP_TLX_CLK_SETTING == 0 {
            select(field!(self.scc, tmif2xclk), timer)?;
            select(field!(self.scc, tsif2xclk), timer)?;
        }
        select(field!(self.scc, usbhclk), timer)?;
        select(field!(self.scc, pcieaclk), timer)?;
        select(field!(self.scc, pcietlclk), timer)?;
        select(field!(self.scc, pxlclk), timer)
    }

    fn program(&mut self, rate: &ClockRate, wait: bool) -> Result<(), PowerError> {
        let source = match rate.source {
            ClockSource::SysRefClk => CLKSEL_SYSREFCLK,
            ClockSource::SysInClk => CLKSEL_SYSINCLK,
            // Programming the private PLL is not supported.
            ClockSource::PrivatePll => return Err(PowerError::Unsupported),
        };
        set_clock_field(
            field!(self.scp, big_clusterclk_control),
            self.timer,
            CLKDIVSYS_SHIFT,
            u32::from(rate.divider) - 1,
            wait,
        )?;
        set_clock_field(
            field!(self.scp, big_clusterclk_control),
            self.timer,
            CLKSEL_SHIFT,
            source,
            wait,
        )
    }
}

/// Rates of the big cluster clock from the system sources, with SYSINCLK at 1600 MHz.
const BIG_CLUSTER_RATES: [ClockRate; 3] = [
    ClockRate {
        rate_hz: REFCLK_FREQUENCY_HZ,
        source: ClockSource::SysRefClk,
        divider: 1,
    },
    ClockRate {
        rate_hz: 400_000_000,
        source: ClockSource::SysInClk,
        divider: 4,
    },
    ClockRate {
        rate_hz: 800_000_000,
        source: ClockSource::SysInClk,
        divider: 2,
    },
];

/// Converts the base address of a device to a pointer, failing the build if it is null.
const fn address<T>(address: usize) -> NonNull<T> {
    match NonNull::new(address as *mut T) {
        Some(pointer) => pointer,
        None => panic!("Null device address"),
    }
}

/// Creates a pointer to the device at `base`.
///
/// # Safety
///
/// `base` must be the base address of a device with registers of type `T`, and nothing else
/// may access that address range.
unsafe fn device<T>(base: NonNull<T>) -> UniqueMmioPointer<'static, T> {
    // SAFETY: Our caller guarantees that the address is a valid device which nothing else
    // accesses.
    unsafe { UniqueMmioPointer::new(base) }
}

fn ppu(name: &'static str, base: NonNull<PpuRegisters>) -> Ppu<'static, MmioPpu<'static>> {
    // SAFETY: Each PPU address is only used for a single driver, created once by `DOMAINS`.
    let regs = unsafe { device(base) };
    Ppu::new(name, MmioPpu::new(regs), Some(&*TIMER as &dyn Timer), &EVENTS)
}

static EVENTS: EventQueue = EventQueue::new();

static COUNTER: Lazy<MmioCounter<'static>> = Lazy::new(|| MmioCounter {
    // SAFETY: The counter frame is only accessed through this static.
    regs: SpinMutex::new(unsafe { device(REFCLK_CNTREAD_BASE_ADDRESS) }),
    frequency_hz: REFCLK_FREQUENCY_HZ,
});

static TIMER: Lazy<CounterTimer<'static, MmioCounter<'static>>> =
    Lazy::new(|| CounterTimer::new(&COUNTER));

static ALARM: Lazy<PollingAlarm<'static, MmioCounter<'static>>> =
    Lazy::new(|| PollingAlarm::new(&COUNTER, &EVENTS));

static NVIC: Lazy<Nvic<'static>> = Lazy::new(|| {
    // SAFETY: The NVIC registers are only accessed through this static.
    Nvic::new(unsafe { device(NVIC_BASE_ADDRESS) })
});

static LOG_SINK: Once<LockedWriter<Uart<'static>>> = Once::new();

type JunoPpu = MmioPpu<'static>;

struct Domains {
    big_cores: [CorePpu<'static, JunoPpu>; BIG_CORE_COUNT],
    little_cores: [CorePpu<'static, JunoPpu>; LITTLE_CORE_COUNT],
    big_cluster: ClusterPpu<'static, JunoPpu>,
    little_cluster: ClusterPpu<'static, JunoPpu>,
    debug: &'static DevicePpu<'static, JunoPpu>,
    gpu: DevicePpu<'static, JunoPpu>,
    systop: SystemPpu<'static, JunoPpu>,
}

static DEBUG_DOMAIN: Lazy<DevicePpu<'static, JunoPpu>> =
    Lazy::new(|| DevicePpu::new(ppu("dbgsys", PPU_DBGSYS_BASE)));

fn core_ppu(
    name: &'static str,
    base: NonNull<PpuRegisters>,
    wakeup: IntId,
    warm_reset: IntId,
) -> CorePpu<'static, JunoPpu> {
    CorePpu::new(
        ppu(name, base),
        &*NVIC,
        CoreInterrupts {
            wakeup_irq: wakeup,
            wakeup_fiq: wakeup + 1,
            warm_reset_irq: warm_reset,
        },
        Some(&*ALARM as &dyn Alarm),
    )
}

static DOMAINS: Lazy<Domains> = Lazy::new(|| {
    let debug: &'static DevicePpu<'static, JunoPpu> = &DEBUG_DOMAIN;
    Domains {
        big_cores: [
            core_ppu("big_cpu0", PPU_BIG_CPU0_BASE, BIG_WAKEUP_IRQ_BASE, BIG_WARM_RESET_IRQ_BASE),
            core_ppu(
                "big_cpu1",
                PPU_BIG_CPU1_BASE,
                BIG_WAKEUP_IRQ_BASE + 2,
                BIG_WARM_RESET_IRQ_BASE + 1,
            ),
        ],
        little_cores: [
            core_ppu(
                "little_cpu0",
                PPU_LITTLE_CPU0_BASE,
                LITTLE_WAKEUP_IRQ_BASE,
                LITTLE_WARM_RESET_IRQ_BASE,
            ),
            core_ppu(
                "little_cpu1",
                PPU_LITTLE_CPU1_BASE,
                LITTLE_WAKEUP_IRQ_BASE + 2,
                LITTLE_WARM_RESET_IRQ_BASE + 1,
            ),
            core_ppu(
                "little_cpu2",
                PPU_LITTLE_CPU2_BASE,
                LITTLE_WAKEUP_IRQ_BASE + 4,
                LITTLE_WARM_RESET_IRQ_BASE + 2,
            ),
            core_ppu(
                "little_cpu3",
                PPU_LITTLE_CPU3_BASE,
                LITTLE_WAKEUP_IRQ_BASE + 6,
                LITTLE_WARM_RESET_IRQ_BASE + 3,
            ),
        ],
        big_cluster: ClusterPpu::new(ppu("big_sstop", PPU_BIG_SSTOP_BASE), Some(debug)),
        little_cluster: ClusterPpu::new(ppu("little_sstop", PPU_LITTLE_SSTOP_BASE), Some(debug)),
        debug,
        gpu: DevicePpu::new(ppu("gputop", PPU_GPUTOP_BASE)),
        systop: SystemPpu::new(ppu("systop", PPU_SYSTOP_BASE)),
    }
});

static DRIVERS: Lazy<[&'static dyn PowerDomainDriver; DOMAIN_COUNT]> = Lazy::new(|| {
    let domains = &*DOMAINS;
    [
        &domains.big_cores[0],
        &domains.big_cores[1],
        &domains.little_cores[0],
        &domains.little_cores[1],
        &domains.little_cores[2],
        &domains.little_cores[3],
        &domains.big_cluster,
        &domains.little_cluster,
        domains.debug,
        &domains.gpu,
        &domains.systop,
    ]
});

static DMC: Lazy<Dmc<'static, MmioDmc<'static>>> = Lazy::new(|| {
    // SAFETY: The DMC, PHY and retention registers are only accessed through this static.
    let hardware = unsafe {
        MmioDmc::new(
            device(DMC_BASE),
            [device(DDR_PHY0_BASE), device(DDR_PHY1_BASE)],
            device(SCC_PHY_RETENTION),
        )
    };
    Dmc::new(SYSTOP, hardware, &*TIMER, &*NVIC, PHY_TRAINING_IRQ)
});

static SOC_CLOCK: Once<SocClock<'static, JunoClocks<'static>>> = Once::new();

fn soc_clock() -> Result<&'static SocClock<'static, JunoClocks<'static>>, PowerError> {
    SOC_CLOCK.try_call_once(|| {
        // SAFETY: The clock control registers are only accessed through this static.
        let hardware = unsafe {
            JunoClocks {
                scp: device(SCP_CONFIG_CLOCKS),
                scc: device(SCC_CLOCKS),
                timer: &*TIMER,
            }
        };
        SocClock::new("big_clusterclk", SYSTOP, DBGSYS, hardware, &BIG_CLUSTER_RATES)
    })
}

/// The Juno board.
pub struct Juno;

impl Platform for Juno {
    const POWER_DOMAINS: &'static [PowerDomainConfig] = JUNO_POWER_DOMAINS;

    fn init_logger() {
        let sink = LOG_SINK.call_once(|| {
            // SAFETY: `PL011_BASE_ADDRESS` is the base address of the SCP UART, and nothing else
            // accesses that address range.
            LockedWriter::new(Uart::new(unsafe {
                device(PL011_BASE_ADDRESS)
            }))
        });
        logger::init(sink).expect("Failed to initialise logger");
    }

    fn drivers() -> &'static [&'static dyn PowerDomainDriver] {
        &*DRIVERS
    }

    fn events() -> &'static EventQueue {
        &EVENTS
    }
}

impl Juno {
    /// Dispatches an interrupt to the driver which owns the line.
    pub fn handle_interrupt(id: IntId) {
        let domains = &*DOMAINS;
        for core in domains.big_cores.iter().chain(&domains.little_cores) {
            let lines = core.lines();
            let result = if id == lines.wakeup_irq || id == lines.wakeup_fiq {
                core.handle_wakeup_interrupt()
            } else if id == lines.warm_reset_irq {
                core.handle_warm_reset_interrupt()
            } else {
                continue;
            };
            if let Err(e) = result {
                error!("{}: failed to handle interrupt {id}: {e}", core.ppu().name());
            }
            return;
        }
        error!("Unexpected interrupt {id}");
    }

    /// Adds the memory controller and the SoC clock to `manager`.
    pub fn add_subscribers(manager: &mut PowerDomainManager<'static>) -> Result<(), PowerError> {
        DMC.register(manager)?;
        soc_clock()?.register(manager)?;
        Ok(())
    }

    /// Waits for system top to power on, builds the power domain manager and runs the event loop
    /// forever.
    pub fn run() -> ! {
        Self::init_logger();
        DOMAINS.systop.wait_for_boot_power_on();
        info!("Starting power domain manager");
        let mut manager = match Self::power_domain_manager() {
            Ok(manager) => manager,
            Err(e) => panic!("Failed to create power domain manager: {e}"),
        };
        if let Err(e) = Self::add_subscribers(&mut manager) {
            panic!("Failed to add power domain subscribers: {e}");
        }
        manager.run(|| {
            ALARM.poll();
            spin_loop();
        })
    }
}
