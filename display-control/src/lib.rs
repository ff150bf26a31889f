//! display-control library crate.
//!
//! Keeps a Samsung commercial display aligned with a configured on/off
//! schedule over the MDC protocol, and exposes the controller the loops
//! share for integration testing and manual control.

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod logging;
pub mod notification;
pub mod schedule;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod status;
pub mod utils;
pub mod watchdog;

pub use error::{Error, Result};
