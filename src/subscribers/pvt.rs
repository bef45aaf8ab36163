// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Process, voltage and temperature sensor groups.
//!
//! A group holds several ring oscillator sensors sharing one interrupt, and only one of them can
//! be measured at a time. Measurements take a while, so a PRE notification arriving while one is
//! in flight is deferred until the sample is in.

use crate::{
    error::PowerError,
    event::{Event, EventQueue},
    interrupt::{IntId, InterruptController},
    power_domain::{
        Cookie, NodeId, Phase, PostTransitionNotification, PowerDomainManager,
        PreTransitionNotification, PreTransitionResponse, ResponseStatus, SubscriberId,
        Subscriptions, TransitionSubscriber,
    },
    power_state::PowerState,
};
use log::{debug, error, warn};
use spin::mutex::SpinMutex;

/// The reference clock the oscillators are counted against, in kHz.
pub const REFCLK_KHZ: u32 = 50_000;

/// The most sensors a group can have.
pub const MAX_PVT_SENSORS: usize = 8;

const SAMPLE_WINDOW_MASK: u32 = 0xffff;
const SAMPLE_VALUE_MASK: u32 = 0xffff;

/// Degrees Celsius.
const FULL_SCALE_TEMPERATURE: i64 = 200;
/// Millivolts.
const FULL_SCALE_VOLTAGE: i64 = 1000;

/// What a sensor measures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SensorKind {
    /// Temperature, reported in millidegrees Celsius.
    Temperature,
    /// Voltage, reported in millivolts.
    Voltage,
}

/// The straight line mapping oscillator frequency to a measurement, and the sample window which
/// fits the full scale of the measurement into the sample counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Calibration {
    slope_khz: i64,
    offset_khz: i64,
    sample_window: u32,
}

impl Calibration {
    /// Derives the calibration of a temperature sensor from its factory readings at 45°C and
    /// 85°C, in units of 10 kHz.
    pub fn temperature(reading_45c: u16, reading_85c: u16) -> Result<Self, PowerError> {
        if reading_45c == 0 || reading_85c == 0 {
            return Err(PowerError::InvalidParam);
        }
        let freq_45 = i64::from(reading_45c) * 10;
        let freq_85 = i64::from(reading_85c) * 10;
        let slope = (freq_85 - freq_45) / (85 - 45);
        Self::from_line(slope, freq_85 - slope * 85, FULL_SCALE_TEMPERATURE)
    }

    /// Derives the calibration of a voltage sensor from its factory readings at 810mV and 900mV,
    /// in units of 20 kHz.
    pub fn voltage(reading_810mv: u16, reading_900mv: u16) -> Result<Self, PowerError> {
        if reading_810mv == 0 || reading_900mv == 0 {
            return Err(PowerError::InvalidParam);
        }
        let freq_810 = i64::from(reading_810mv) * 20;
        let freq_900 = i64::from(reading_900mv) * 20;
        let slope = (freq_900 - freq_810) / (900 - 810);
        Self::from_line(slope, freq_900 - slope * 900, FULL_SCALE_VOLTAGE)
    }

    fn from_line(slope_khz: i64, offset_khz: i64, full_scale: i64) -> Result<Self, PowerError> {
        if slope_khz == 0 {
            return Err(PowerError::InvalidParam);
        }
        // The window is sized so that the full-scale frequency just fits in the counter, which
        // only works if it is at least the reference frequency.
        let full_scale_khz = slope_khz * full_scale + offset_khz;
        if full_scale_khz < i64::from(REFCLK_KHZ) {
            return Err(PowerError::InvalidParam);
        }
        let sample_window =
            i64::from(SAMPLE_WINDOW_MASK) * i64::from(REFCLK_KHZ) / full_scale_khz;
        let sample_window = u32::try_from(sample_window)
            .ok()
            .filter(|window| *window != 0 && *window <= SAMPLE_WINDOW_MASK)
            .ok_or(PowerError::InvalidParam)?;
        Ok(Self {
            slope_khz,
            offset_khz,
            sample_window,
        })
    }

    /// Returns the number of reference clock cycles to count oscillations for.
    pub fn sample_window(&self) -> u32 {
        self.sample_window
    }

    /// Converts an oscillation count to millidegrees or microvolts.
    fn convert(&self, count: u32) -> i64 {
        let freq_khz = i64::from(count) * i64::from(REFCLK_KHZ) / i64::from(self.sample_window);
        (freq_khz - self.offset_khz) * 1000 / self.slope_khz
    }
}

/// A sensor within a group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PvtSensor {
    /// The position of the sensor within its group.
    pub index: u8,
    /// What the sensor measures.
    pub kind: SensorKind,
    /// The calibration of the sensor.
    pub calibration: Calibration,
}

/// Access to the registers of a sensor group.
pub trait PvtHardware: Send {
    /// Returns the number of sensors in the group, or `None` if the group isn't of the supported
    /// kind.
    fn sensor_count(&mut self) -> Option<u32>;

    /// Configures the group and starts measuring the sensor with the given index.
    ///
    /// The configuration is lost whenever the domain of the group powers off, so this sets
    /// everything up each time.
    fn start(&mut self, index: u8, sample_window: u32);

    /// Acknowledges the interrupt of the group.
    fn clear_interrupt(&mut self);

    /// Returns the count of the sensor with the given index, or `None` if the sample is not
    /// valid.
    fn sample(&mut self, index: u8) -> Option<u32>;
}

#[derive(Debug)]
struct GroupState {
    powered: bool,
    reading: Option<usize>,
    deferred: Option<Cookie>,
    last_counts: [u32; MAX_PVT_SENSORS],
    completed: Option<(usize, i64)>,
}

/// A group of sensors in one power domain.
pub struct PvtGroup<'a, H: PvtHardware> {
    name: &'static str,
    node: NodeId,
    hardware: SpinMutex<H>,
    sensors: &'a [PvtSensor],
    temperature_offset: i64,
    interrupts: &'a dyn InterruptController,
    irq: IntId,
    events: &'a EventQueue,
    state: SpinMutex<GroupState>,
}

impl<'a, H: PvtHardware + 'a> PvtGroup<'a, H> {
    /// Creates a group of sensors in the domain of `node`, which raises `irq` when a sample is
    /// complete.
    ///
    /// Returns `InvalidParam` if there are too many sensors.
    pub fn new(
        name: &'static str,
        node: NodeId,
        hardware: H,
        sensors: &'a [PvtSensor],
        interrupts: &'a dyn InterruptController,
        irq: IntId,
        events: &'a EventQueue,
    ) -> Result<Self, PowerError> {
        if sensors.len() > MAX_PVT_SENSORS {
            return Err(PowerError::InvalidParam);
        }
        Ok(Self {
            name,
            node,
            hardware: SpinMutex::new(hardware),
            sensors,
            temperature_offset: 0,
            interrupts,
            irq,
            events,
            state: SpinMutex::new(GroupState {
                powered: false,
                reading: None,
                deferred: None,
                last_counts: [0; MAX_PVT_SENSORS],
                completed: None,
            }),
        })
    }

    /// Sets a constant, in millidegrees, to subtract from every temperature.
    pub fn with_temperature_offset(mut self, millidegrees: i64) -> Self {
        self.temperature_offset = millidegrees;
        self
    }

    /// Adds the group to `manager`, listening for both phases of its domain.
    pub fn register(
        &'a self,
        manager: &mut PowerDomainManager<'a>,
    ) -> Result<SubscriberId, PowerError> {
        let powered = manager.get_state(self.node)? == PowerState::On;
        let id = manager.add_subscriber(self)?;
        manager.subscribe(id, self.node, Phase::Pre)?;
        manager.subscribe(id, self.node, Phase::Post)?;
        self.state.lock().powered = powered;
        Ok(id)
    }

    /// Returns whether the domain of the group is powered, as far as the group knows.
    pub fn is_powered(&self) -> bool {
        self.state.lock().powered
    }

    /// Starts measuring the sensor with the given position in the group's sensor list.
    ///
    /// The result is made available through [`take_reading`](Self::take_reading) once the group's
    /// interrupt has been handled.
    pub fn start_reading(&self, sensor: usize) -> Result<(), PowerError> {
        let config = self.sensors.get(sensor).ok_or(PowerError::InvalidParam)?;
        let mut state = self.state.lock();
        if !state.powered {
            return Err(PowerError::Denied);
        }
        if state.reading.is_some() {
            return Err(PowerError::Busy);
        }

        let mut hardware = self.hardware.lock();
        match hardware.sensor_count() {
            Some(count) if count as usize >= self.sensors.len() => {}
            _ => {
                error!("{}: unexpected sensor group layout", self.name);
                return Err(PowerError::DeviceError);
            }
        }
        self.interrupts.clear_pending(self.irq)?;
        self.interrupts.enable(self.irq)?;
        hardware.start(config.index, config.calibration.sample_window());
        state.reading = Some(sensor);
        Ok(())
    }

    /// Handles the interrupt raised when a sample is complete.
    pub fn handle_interrupt(&self) {
        self.hardware.lock().clear_interrupt();
        if self.interrupts.disable(self.irq).is_err() {
            warn!("{}: failed to mask interrupt {}", self.name, self.irq);
        }

        let mut state = self.state.lock();
        let Some(sensor) = state.reading.take() else {
            warn!("{}: interrupt without a reading in flight", self.name);
            return;
        };
        let config = self.sensors[sensor];
        let count = match self.hardware.lock().sample(config.index) {
            Some(count) => {
                let count = count & SAMPLE_VALUE_MASK;
                state.last_counts[sensor] = count;
                count
            }
            None => state.last_counts[sensor],
        };
        let value = config.calibration.convert(count);
        let value = match config.kind {
            SensorKind::Temperature => value - self.temperature_offset,
            SensorKind::Voltage => value / 1000,
        };
        debug!("{}: sensor {sensor} read {value}", self.name);
        state.completed = Some((sensor, value));

        if let Some(cookie) = state.deferred.take() {
            let event = Event::DeferredResponse {
                cookie,
                status: ResponseStatus::Success,
            };
            if self.events.post(event).is_err() {
                error!("{}: lost deferred response {}", self.name, cookie.raw());
            }
        }
    }

    /// Takes the last completed reading, as the position of the sensor and its value.
    pub fn take_reading(&self) -> Option<(usize, i64)> {
        self.state.lock().completed.take()
    }
}

impl<'a, H: PvtHardware + 'a> TransitionSubscriber for PvtGroup<'a, H> {
    fn on_pre_transition(
        &self,
        notification: &PreTransitionNotification,
        _subscriptions: &mut Subscriptions,
    ) -> PreTransitionResponse {
        if notification.node != self.node {
            return PreTransitionResponse::Success;
        }
        let mut state = self.state.lock();
        if notification.target_state == PowerState::Off {
            state.powered = false;
        }
        if state.reading.is_some() {
            state.deferred = Some(notification.cookie);
            PreTransitionResponse::Deferred
        } else {
            PreTransitionResponse::Success
        }
    }

    fn on_post_transition(
        &self,
        notification: &PostTransitionNotification,
        _subscriptions: &mut Subscriptions,
    ) {
        if notification.node == self.node && notification.state == PowerState::On {
            self.state.lock().powered = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::test::{CLUSTER0, TestSystem},
        power_domain::{Completion, RequestStatus},
    };

    const PVT_IRQ: IntId = 61;

    struct FakePvt {
        count: Option<u32>,
        started: Vec<(u8, u32)>,
        cleared: usize,
    }

    impl PvtHardware for FakePvt {
        fn sensor_count(&mut self) -> Option<u32> {
            Some(2)
        }

        fn start(&mut self, index: u8, sample_window: u32) {
            self.started.push((index, sample_window));
        }

        fn clear_interrupt(&mut self) {
            self.cleared += 1;
        }

        fn sample(&mut self, _index: u8) -> Option<u32> {
            self.count
        }
    }

    fn sensors() -> &'static [PvtSensor] {
        Box::leak(Box::new([
            PvtSensor {
                index: 0,
                kind: SensorKind::Temperature,
                calibration: Calibration::temperature(5000, 5400).unwrap(),
            },
            PvtSensor {
                index: 1,
                kind: SensorKind::Voltage,
                calibration: Calibration::voltage(2000, 2450).unwrap(),
            },
        ]))
    }

    fn group(system: &TestSystem, count: Option<u32>) -> &'static PvtGroup<'static, FakePvt> {
        let hardware = FakePvt {
            count,
            started: Vec::new(),
            cleared: 0,
        };
        Box::leak(Box::new(
            PvtGroup::new(
                "pvt",
                CLUSTER0,
                hardware,
                sensors(),
                system.interrupts,
                PVT_IRQ,
                system.events,
            )
            .unwrap(),
        ))
    }

    #[test]
    fn temperature_calibration() {
        let calibration = Calibration::temperature(5000, 5400).unwrap();
        assert_eq!(calibration.sample_window(), 50026);
        // 51500 kHz is 60°C.
        assert_eq!(calibration.convert(51526), 59_990);
    }

    #[test]
    fn voltage_calibration() {
        let calibration = Calibration::voltage(2000, 2450).unwrap();
        assert_eq!(calibration.sample_window(), 55538);
        // 44000 kHz is 850mV.
        assert_eq!(calibration.convert(48873) / 1000, 849);
    }

    #[test]
    fn bad_calibration() {
        assert_eq!(Calibration::temperature(0, 5400), Err(PowerError::InvalidParam));
        assert_eq!(Calibration::temperature(5000, 5000), Err(PowerError::InvalidParam));
        assert_eq!(Calibration::temperature(100, 200), Err(PowerError::InvalidParam));
        assert_eq!(Calibration::voltage(2000, 0), Err(PowerError::InvalidParam));
    }

    #[test]
    fn one_reading_at_a_time() {
        let system = TestSystem::new();
        let mut manager = system.manager();
        let group = group(&system, Some(51526));
        assert_eq!(group.start_reading(0), Err(PowerError::Denied));
        group.register(&mut manager).unwrap();
        assert!(group.is_powered());

        assert_eq!(group.start_reading(2), Err(PowerError::InvalidParam));
        group.start_reading(0).unwrap();
        assert!(system.interrupts.is_enabled(PVT_IRQ).unwrap());
        assert_eq!(group.start_reading(1), Err(PowerError::Busy));
        assert_eq!(group.hardware.lock().started, [(0, 50026)]);

        group.handle_interrupt();
        assert!(!system.interrupts.is_enabled(PVT_IRQ).unwrap());
        assert_eq!(group.take_reading(), Some((0, 59_990)));
        assert_eq!(group.take_reading(), None);
        assert!(system.events.is_empty());

        group.start_reading(1).unwrap();
        group.handle_interrupt();
        assert_eq!(group.take_reading(), Some((1, 873)));
    }

    #[test]
    fn invalid_sample_reuses_last_count() {
        let system = TestSystem::new();
        let mut manager = system.manager();
        let group = group(&system, Some(51526));
        group.register(&mut manager).unwrap();

        group.start_reading(0).unwrap();
        group.handle_interrupt();
        group.take_reading().unwrap();

        group.hardware.lock().count = None;
        group.start_reading(0).unwrap();
        group.handle_interrupt();
        assert_eq!(group.take_reading(), Some((0, 59_990)));
        assert_eq!(group.hardware.lock().cleared, 2);
    }

    #[test]
    fn temperature_offset() {
        let system = TestSystem::new();
        let mut manager = system.manager();
        let group = Box::leak(Box::new(
            PvtGroup::new(
                "pvt",
                CLUSTER0,
                FakePvt {
                    count: Some(51526),
                    started: Vec::new(),
                    cleared: 0,
                },
                sensors(),
                system.interrupts,
                PVT_IRQ,
                system.events,
            )
            .unwrap()
            .with_temperature_offset(9000),
        ));
        group.register(&mut manager).unwrap();
        group.start_reading(0).unwrap();
        group.handle_interrupt();
        assert_eq!(group.take_reading(), Some((0, 50_990)));
    }

    #[test]
    fn power_off_waits_for_reading() {
        let system = TestSystem::new();
        let mut manager = system.manager();
        let group = group(&system, Some(51526));
        group.register(&mut manager).unwrap();
        group.start_reading(0).unwrap();

        let Ok(RequestStatus::Pending(id)) = manager.request_state(CLUSTER0, PowerState::Off)
        else {
            panic!("power off should wait for the reading");
        };
        assert!(!group.is_powered());
        assert_eq!(manager.get_state(CLUSTER0), Ok(PowerState::On));

        group.handle_interrupt();
        manager.process_events();
        assert_eq!(manager.get_state(CLUSTER0), Ok(PowerState::Off));
        assert_eq!(
            manager.take_completed().as_slice(),
            [Completion { id, result: Ok(()) }]
        );
        assert_eq!(group.start_reading(0), Err(PowerError::Denied));

        assert_eq!(
            manager.request_state(CLUSTER0, PowerState::On),
            Ok(RequestStatus::Done)
        );
        assert!(group.is_powered());
        group.start_reading(0).unwrap();
    }

    #[test]
    fn idle_group_does_not_defer() {
        let system = TestSystem::new();
        let mut manager = system.manager();
        let group = group(&system, Some(51526));
        group.register(&mut manager).unwrap();

        assert_eq!(
            manager.request_state(CLUSTER0, PowerState::Off),
            Ok(RequestStatus::Done)
        );
        assert!(!group.is_powered());
    }
}
