//! Internal logging shim.
//!
//! A thin wrapper around the `log` facade so call sites read `fmt::debug!(...)` etc. without an
//! explicit `use log::debug` in every module. Kept as its own module (and imported first in
//! `lib.rs`) purely so the macros are visible everywhere else in the crate.

#![macro_use]
#![allow(unused_macros)]

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        ::log::trace!($s $(, $x)*);
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        ::log::debug!($s $(, $x)*);
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        ::log::info!($s $(, $x)*);
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        ::log::warn!($s $(, $x)*);
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        ::log::error!($s $(, $x)*);
    };
}
