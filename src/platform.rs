// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Platform selection and the hooks each platform provides.

macro_rules! select_platform {
    (platform = $condition:literal, $mod:ident::$plat_impl:ident) => {
        #[cfg(platform = $condition)]
        pub mod $mod;

        #[cfg(platform = $condition)]
        pub use $mod::$plat_impl as PlatformImpl;
    };
    (test, $mod:ident::$plat_impl:ident) => {
        #[cfg(test)]
        pub mod $mod;

        #[cfg(test)]
        pub use $mod::$plat_impl as PlatformImpl;
    };
}

select_platform!(platform = "juno", juno::Juno);
select_platform!(test, test::TestPlatform);

use crate::{
    config::PowerDomainConfig,
    driver::PowerDomainDriver,
    error::PowerError,
    event::EventQueue,
    power_domain::PowerDomainManager,
};

/// The hooks implemented by all platforms.
pub trait Platform {
    /// The power domains of the platform, sorted by tree position.
    const POWER_DOMAINS: &'static [PowerDomainConfig];

    /// Initialises the logger.
    ///
    /// Any logs sent before this is called will be ignored.
    fn init_logger();

    /// Returns the driver of each power domain, in the same order as
    /// [`POWER_DOMAINS`](Self::POWER_DOMAINS).
    ///
    /// This must only be called once, as drivers can only be bound to a node once.
    fn drivers() -> &'static [&'static dyn PowerDomainDriver];

    /// Returns the queue which drivers post their events to.
    fn events() -> &'static EventQueue;

    /// Builds the power domain manager for the platform.
    fn power_domain_manager() -> Result<PowerDomainManager<'static>, PowerError> {
        PowerDomainManager::new(Self::POWER_DOMAINS, Self::drivers(), Self::events())
    }
}
