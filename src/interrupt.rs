// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Interrupt controller access for drivers which gate their own interrupt lines.

use crate::error::PowerError;
use safe_mmio::{UniqueMmioPointer, field, field_shared, fields::ReadPureWrite};
use spin::mutex::SpinMutex;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// An interrupt line number.
pub type IntId = u32;

/// Enabling, disabling and clearing individual interrupt lines.
pub trait InterruptController: Sync {
    /// Enables the given interrupt line.
    fn enable(&self, id: IntId) -> Result<(), PowerError>;

    /// Disables the given interrupt line.
    fn disable(&self, id: IntId) -> Result<(), PowerError>;

    /// Clears any pending state of the given interrupt line.
    fn clear_pending(&self, id: IntId) -> Result<(), PowerError>;

    /// Returns whether the given interrupt line is enabled.
    fn is_enabled(&self, id: IntId) -> Result<bool, PowerError>;
}

const NVIC_REGISTER_COUNT: usize = 16;

/// The interrupt enable and pending registers of a Cortex-M NVIC, starting at offset 0x100 of the
/// System Control Space.
#[derive(Clone, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C, align(4))]
pub struct NvicRegisters {
    iser: [ReadPureWrite<u32>; NVIC_REGISTER_COUNT],
    reserved0: [u32; 16],
    icer: [ReadPureWrite<u32>; NVIC_REGISTER_COUNT],
    reserved1: [u32; 16],
    ispr: [ReadPureWrite<u32>; NVIC_REGISTER_COUNT],
    reserved2: [u32; 16],
    icpr: [ReadPureWrite<u32>; NVIC_REGISTER_COUNT],
}

/// Driver for the Cortex-M nested vectored interrupt controller.
///
/// All registers are write-one-to-act, so no read-modify-write is needed.
pub struct Nvic<'a> {
    regs: SpinMutex<UniqueMmioPointer<'a, NvicRegisters>>,
}

impl<'a> Nvic<'a> {
    /// Creates a driver for the NVIC with the given registers.
    pub fn new(regs: UniqueMmioPointer<'a, NvicRegisters>) -> Self {
        Self {
            regs: SpinMutex::new(regs),
        }
    }

    fn split(id: IntId) -> (usize, u32) {
        ((id / 32) as usize, 1 << (id % 32))
    }
}

impl InterruptController for Nvic<'_> {
    fn enable(&self, id: IntId) -> Result<(), PowerError> {
        let (index, bit) = Self::split(id);
        let mut regs = self.regs.lock();
        field!(regs, iser)
            .get(index)
            .ok_or(PowerError::InvalidParam)?
            .write(bit);
        Ok(())
    }

    fn disable(&self, id: IntId) -> Result<(), PowerError> {
        let (index, bit) = Self::split(id);
        let mut regs = self.regs.lock();
        field!(regs, icer)
            .get(index)
            .ok_or(PowerError::InvalidParam)?
            .write(bit);
        Ok(())
    }

    fn clear_pending(&self, id: IntId) -> Result<(), PowerError> {
        let (index, bit) = Self::split(id);
        let mut regs = self.regs.lock();
        field!(regs, icpr)
            .get(index)
            .ok_or(PowerError::InvalidParam)?
            .write(bit);
        Ok(())
    }

    fn is_enabled(&self, id: IntId) -> Result<bool, PowerError> {
        let (index, bit) = Self::split(id);
        let regs = self.regs.lock();
        let value = field_shared!(regs, iser)
            .get(index)
            .ok_or(PowerError::InvalidParam)?
            .read();
        Ok(value & bit != 0)
    }
}
