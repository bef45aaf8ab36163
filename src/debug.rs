// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Build configuration flags.

/// True if the build is configured with debug assertions on.
pub const DEBUG: bool = cfg!(debug_assertions);
