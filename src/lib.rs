// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Power domain management for an Arm System Control Processor.
//!
//! The crate models the power domains of an SoC as a tree of nodes, each backed by a Power Policy
//! Unit (PPU) driver. State changes are validated against the tree, bracketed by a two-phase
//! notification protocol that lets peripheral drivers prepare for and recover from the change, and
//! sequenced through a single-threaded event loop. Interrupt handlers never touch the tree
//! directly: they post an [`event::Event`] which the loop then processes.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod debug;
pub mod driver;
pub mod error;
pub mod event;
pub mod interrupt;
pub mod logger;
pub mod platform;
pub mod power_domain;
pub mod power_state;
pub mod ppu;
pub mod subscribers;
pub mod timer;

pub use error::PowerError;
pub use power_domain::{NodeId, PowerDomainManager};
pub use power_state::PowerState;
