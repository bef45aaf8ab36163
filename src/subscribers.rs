// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Peripheral drivers which follow the power state of the domain they live in.
//!
//! Each of these implements [`TransitionSubscriber`](crate::power_domain::TransitionSubscriber)
//! and registers itself with the manager through a `register` method.

pub mod dmc;
pub mod pvt;
pub mod soc_clock;
