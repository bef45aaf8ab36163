// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Power states, domain types and the encodings used to address domains in the tree.

use crate::{config::MAX_LEVELS, error::PowerError};
use bitflags::bitflags;
use core::fmt::{self, Debug, Display, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A power state which a domain may be in or be asked to enter.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum PowerState {
    /// Power and clocks removed.
    Off = 0,
    /// Fully operational.
    On = 1,
    /// Powered down, but wakes up automatically on an interrupt.
    Sleep = 2,
    /// Logic powered down with memories retained.
    MemRetention = 3,
    /// Held in warm reset.
    WarmReset = 4,
    /// System-wide suspend with DRAM in self-refresh.
    SystemSleep0 = 5,
}

impl PowerState {
    /// The number of distinct power states, and so the length of a complete allowed state table.
    pub const COUNT: usize = 6;

    /// Returns the normalised depth of the state, where a larger value is a deeper state.
    ///
    /// OFF is the deepest state and SLEEP the next deepest, whatever their numeric values; all
    /// other states are ordered by value.
    pub const fn depth(self) -> u8 {
        match self {
            Self::On => 1,
            Self::MemRetention => 3,
            Self::WarmReset => 4,
            Self::SystemSleep0 => 5,
            Self::Sleep => 16,
            Self::Off => 17,
        }
    }

    /// Returns whether `self` is a strictly deeper state than `other`.
    pub const fn is_deeper_than(self, other: Self) -> bool {
        self.depth() > other.depth()
    }

    /// Returns whether `self` is a strictly shallower state than `other`.
    pub const fn is_shallower_than(self, other: Self) -> bool {
        self.depth() < other.depth()
    }

    /// Returns the index of this state into an allowed state table.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl Display for PowerState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            Self::Off => "OFF",
            Self::On => "ON",
            Self::Sleep => "SLEEP",
            Self::MemRetention => "MEM_RET",
            Self::WarmReset => "WARM_RESET",
            Self::SystemSleep0 => "SLEEP0",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// A set of power states.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct StateMask: u32 {
        /// [`PowerState::Off`]
        const OFF = 1 << 0;
        /// [`PowerState::On`]
        const ON = 1 << 1;
        /// [`PowerState::Sleep`]
        const SLEEP = 1 << 2;
        /// [`PowerState::MemRetention`]
        const MEM_RETENTION = 1 << 3;
        /// [`PowerState::WarmReset`]
        const WARM_RESET = 1 << 4;
        /// [`PowerState::SystemSleep0`]
        const SYSTEM_SLEEP0 = 1 << 5;
    }
}

impl StateMask {
    /// Returns the mask containing only the given state.
    pub const fn of(state: PowerState) -> Self {
        Self::from_bits_retain(1 << state as u8)
    }

    /// Returns whether the mask contains the given state.
    pub const fn allows(self, state: PowerState) -> bool {
        self.contains(Self::of(state))
    }

    /// Returns the union of all masks in an allowed state table.
    pub fn union_of(table: &[StateMask]) -> Self {
        table.iter().fold(Self::empty(), |union, mask| union | *mask)
    }
}

/// The kind of a power domain, which determines its driver behaviour and allowed states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerDomainType {
    /// A single processor core.
    Core,
    /// A cluster of cores.
    Cluster,
    /// A top-level device such as a GPU.
    Device,
    /// The debug domain.
    DeviceDebug,
    /// The system top, root of the tree.
    System,
}

/// The kind of system-wide shutdown being performed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SystemShutdown {
    /// Power the system off.
    Shutdown,
    /// Power cycle the whole system.
    ColdReset,
    /// Reset the system without removing power.
    WarmReset,
}

/// The position of a node in the power domain tree.
///
/// Bits 32 and above hold the level of the node, where cores are at level 0. Bits 0 to 31 hold one
/// byte of index per level, with level 0 in the least significant byte. Sorting positions numerically
/// sorts nodes by level and then by their path from the root, which keeps siblings adjacent.
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
pub struct TreePosition(u64);

impl TreePosition {
    /// Creates a position for a node at `level`, with the given per-level indices.
    pub const fn new(level: u8, l3: u8, l2: u8, l1: u8, l0: u8) -> Self {
        Self(
            (level as u64) << 32
                | (l3 as u64) << 24
                | (l2 as u64) << 16
                | (l1 as u64) << 8
                | l0 as u64,
        )
    }

    /// Returns the level of the node.
    pub const fn level(self) -> usize {
        (self.0 >> 32) as usize
    }

    /// Returns the position of this node's parent, or `None` if a node at this level can't have
    /// one.
    pub const fn parent(self) -> Option<Self> {
        let level = self.level();
        if level + 1 >= MAX_LEVELS {
            return None;
        }
        let indices = self.0 & 0xffff_ffff;
        let below_parent = (1 << (8 * (level + 1))) - 1;
        Some(Self(((level as u64 + 1) << 32) | (indices & !below_parent)))
    }

    /// Returns the raw encoding of the position.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl Debug for TreePosition {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "L{}[{}.{}.{}.{}]",
            self.level(),
            (self.0 >> 24) as u8,
            (self.0 >> 16) as u8,
            (self.0 >> 8) as u8,
            self.0 as u8
        )
    }
}

/// The power states requested for a node and each of its ancestors, up to some level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CompositeState {
    states: [PowerState; MAX_LEVELS],
    highest_level: usize,
}

impl CompositeState {
    const LEVEL_BITS: u32 = 4;
    const LEVEL_MASK: u32 = 0xf;
    const HIGHEST_LEVEL_SHIFT: u32 = 16;
    const HIGHEST_LEVEL_MASK: u32 = 0x3;

    /// Creates a composite state. `states[level]` is the state for the ancestor at `level`; entries
    /// above `highest_level` are ignored.
    pub fn new(highest_level: usize, states: [PowerState; MAX_LEVELS]) -> Result<Self, PowerError> {
        if highest_level >= MAX_LEVELS {
            return Err(PowerError::InvalidParam);
        }
        let mut composite = Self {
            states,
            highest_level,
        };
        composite.states[highest_level + 1..].fill(PowerState::Off);
        Ok(composite)
    }

    /// Creates a composite state requesting the same state at every level up to `highest_level`.
    pub fn uniform(highest_level: usize, state: PowerState) -> Result<Self, PowerError> {
        Self::new(highest_level, [state; MAX_LEVELS])
    }

    /// Returns the highest level the composite state covers.
    pub const fn highest_level(&self) -> usize {
        self.highest_level
    }

    /// Returns the state requested at `level`, if the composite covers it.
    pub fn state(&self, level: usize) -> Option<PowerState> {
        (level <= self.highest_level).then(|| self.states[level])
    }

    /// Returns the packed encoding: 4 bits of state per level with level 0 in the lowest bits, and
    /// the highest level at bit 16.
    pub fn to_raw(&self) -> u32 {
        let states = self.states[..=self.highest_level]
            .iter()
            .enumerate()
            .fold(0, |raw, (level, state)| {
                raw | u32::from(u8::from(*state)) << (level as u32 * Self::LEVEL_BITS)
            });
        states | (self.highest_level as u32) << Self::HIGHEST_LEVEL_SHIFT
    }

    /// Decodes a packed composite state.
    pub fn from_raw(raw: u32) -> Result<Self, PowerError> {
        let highest_level = ((raw >> Self::HIGHEST_LEVEL_SHIFT) & Self::HIGHEST_LEVEL_MASK) as usize;
        let mut states = [PowerState::Off; MAX_LEVELS];
        for (level, state) in states[..=highest_level].iter_mut().enumerate() {
            let value = (raw >> (level as u32 * Self::LEVEL_BITS)) & Self::LEVEL_MASK;
            *state = PowerState::try_from(value as u8).map_err(|_| PowerError::InvalidParam)?;
        }
        Self::new(highest_level, states)
    }
}
