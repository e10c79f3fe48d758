#![cfg_attr(not(feature = "std"), no_std)]

//! # Thermal Control Crate
//!
//! `thermal` provides the PID control loop used to regulate temperature on
//! the brewing rig's heating elements. It is a pure computation with no I/O:
//! callers supply a measured temperature and a time delta, and get back a
//! bounded output to hand to a power arbiter or PWM driver.

pub mod pid;

pub use pid::Pid;
