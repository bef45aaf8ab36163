// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Static configuration of the power domain tree, and capacity limits.

use crate::power_state::{PowerDomainType, StateMask, TreePosition};

/// The maximum number of power domains in the tree.
pub const MAX_POWER_DOMAINS: usize = 32;

/// The maximum number of levels in the tree.
pub const MAX_LEVELS: usize = 4;

/// The maximum number of transition subscribers.
pub const MAX_SUBSCRIBERS: usize = 16;

/// The maximum number of subscriptions across all subscribers.
pub const MAX_REGISTRATIONS: usize = 32;

/// The maximum number of notification rounds which may be waiting for deferred responses.
pub const MAX_PENDING_TRANSITIONS: usize = 8;

/// The maximum number of state requests in progress at once.
pub const MAX_REQUESTS: usize = 8;

/// The number of events other than transition reports the event queue can hold.
pub const EVENT_QUEUE_CAPACITY: usize = 32;

/// Configuration of a single power domain.
#[derive(Clone, Copy, Debug)]
pub struct PowerDomainConfig {
    /// Name used in logs.
    pub name: &'static str,
    /// The kind of domain.
    pub domain_type: PowerDomainType,
    /// The position of the domain in the tree.
    pub tree_position: TreePosition,
    /// The states this domain may be in, indexed by the current state of its parent.
    ///
    /// The root of the tree has no parent, so it may be in any state in the union of its table.
    pub allowed_state_mask_table: &'static [StateMask],
    /// If true, no PRE or POST transition notifications are sent for this domain.
    pub disable_state_transition_notifications: bool,
}

impl PowerDomainConfig {
    /// Creates the configuration for a domain with notifications enabled.
    pub const fn new(
        name: &'static str,
        domain_type: PowerDomainType,
        tree_position: TreePosition,
        allowed_state_mask_table: &'static [StateMask],
    ) -> Self {
        Self {
            name,
            domain_type,
            tree_position,
            allowed_state_mask_table,
            disable_state_transition_notifications: false,
        }
    }
}
