#![cfg_attr(docsrs, feature(doc_cfg))]
//! # amplyze_lib
//!
//! This crate provides a library for reading diagnostic telemetry from a battery
//! management unit (BMS) and turning it into a PDF report.
//!
//! A reading is a single line of JSON requested over a serial link (or produced by a
//! simulator). It is decoded into an immutable [`protocol::Snapshot`], including the
//! human readable interpretation of the safety and permanent failure bitfields.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `amplyze` command-line tool.
//!
//! ### Client Features
//! - `serialport`: Enables the **synchronous** serial transport and the acquisition facade using the `serialport` crate.
//!
//! ### Utility Features
//! - `report`: Enables PDF report composition (`printpdf`) and cell voltage charts (`plotters`).
//! - `bin-dependencies`: Enables all features required by the `amplyze` binary executable.

/// Contains error types for the library.
mod error;
/// Defines the wire payload and the decoded snapshot.
pub mod protocol;
/// Synthetic readings for use without hardware.
pub mod simulator;

pub use error::{Error, Result};

/// Synchronous serial transport.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Acquisition facade and session state.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod acquisition;

/// PDF report composition and chart rendering.
#[cfg_attr(docsrs, doc(cfg(feature = "report")))]
#[cfg(feature = "report")]
pub mod report;
