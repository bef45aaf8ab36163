// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Error type shared by the power domain manager, drivers and subscribers.

use core::fmt::{self, Display, Formatter};

/// Errors which may be returned by power domain operations.
///
/// Invariant violations are not represented here: they panic, which halts the firmware.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerError {
    /// A node id, state or other argument was not valid for the target.
    InvalidParam,
    /// A transition is already in flight for the target, or a queue is full.
    Busy,
    /// The hardware did not reach the requested mode within its timeout.
    DeviceError,
    /// The state or operation is not supported by this kind of domain.
    Unsupported,
    /// The transition was vetoed by a deny policy or by a subscriber.
    Denied,
}

impl Display for PowerError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::Busy => write!(f, "busy"),
            Self::DeviceError => write!(f, "device error"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

impl core::error::Error for PowerError {}
