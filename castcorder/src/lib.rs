//! Unattended recorder for intermittent TwitCasting live broadcasts.
//!
//! Each watched channel gets a [`controller::Controller`] that polls the
//! [`resolver`], captures with streamlink through the [`capture`] supervisor,
//! checks the result with the [`validator`] and hands accepted recordings to
//! [`postprocess`]. One [`interrupt::ShutdownSignal`] stops everything.

pub mod capture;
pub mod channels;
pub mod config;
pub mod controller;
pub mod error;
pub mod interrupt;
pub mod logging;
pub mod panic_hook;
pub mod postprocess;
pub mod resolver;
pub mod session;
pub mod utils;
pub mod validator;

pub use error::{Error, Result};
