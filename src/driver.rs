// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The interface between the power domain manager and the drivers of individual domains.

use crate::{
    error::PowerError,
    power_domain::NodeId,
    power_state::{PowerState, SystemShutdown},
};

/// Operations which the power domain manager needs from the driver of each domain.
///
/// Drivers confirm the completion of [`set_state`](Self::set_state) by posting
/// [`Event::TransitionReport`](crate::event::Event::TransitionReport) for their bound node, either
/// before returning or later from an alarm or interrupt. Drivers which don't post reports say so
/// through [`reports_transitions`](Self::reports_transitions), and must have finished the
/// transition when `set_state` returns.
pub trait PowerDomainDriver: Sync {
    /// Binds the driver to the node it serves. Called once when the tree is built.
    fn bind(&self, node: NodeId) -> Result<(), PowerError>;

    /// Starts a transition of the domain to `state`.
    fn set_state(&self, state: PowerState) -> Result<(), PowerError>;

    /// Returns the current state of the domain, as read from the hardware.
    fn get_state(&self) -> Result<PowerState, PowerError>;

    /// Pulses the domain through warm reset and back to ON.
    fn reset(&self) -> Result<(), PowerError>;

    /// Prepares the domain for a system-wide shutdown of the given kind.
    fn shutdown(&self, _kind: SystemShutdown) -> Result<(), PowerError> {
        Ok(())
    }

    /// Returns true if the domain must not enter `state` at the moment.
    fn deny(&self, _state: PowerState) -> bool {
        false
    }

    /// Returns whether the driver posts a transition report for each successful `set_state`.
    fn reports_transitions(&self) -> bool {
        true
    }

    /// Starts turning off the last running core before a system suspend.
    ///
    /// Only core drivers support this.
    fn prepare_for_suspend(&self) -> Result<(), PowerError> {
        Err(PowerError::Unsupported)
    }

    /// Handles the expiry of an alarm which the driver started for its node.
    fn process_alarm(&self) -> Result<(), PowerError> {
        Ok(())
    }
}
