//! Hardware-independent control core for the tally field sensor
//!
//! This crate holds the application state machine of a battery/solar powered
//! counting and occupancy sensor, together with the policies it coordinates:
//! phased connectivity, sleep planning, battery-tier reporting backoff and the
//! error supervisor. Every platform service (radio, sleep, storage, sensors,
//! fuel gauge) is reached through the traits in [`platform`] and [`sensors`].
//!
//! It is `#![no_std]` with `extern crate alloc` so it builds for the device
//! and for desktop hosts (the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod alerts;
pub mod app_state;
pub mod battery;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod counting;
pub mod error;
pub mod flags;
pub mod persistence;
pub mod platform;
pub mod report;
pub mod sensors;
pub mod sleep;
pub mod status;
pub mod supervisor;
