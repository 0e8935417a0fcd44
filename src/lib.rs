//! Client for a remote spreadsheet plotting service.
//!
//! A workbook is uploaded, a sheet is introspected for columns, chart
//! parameters are edited (with defaults derived from the columns), and the
//! service renders previews and exports. [`orchestrator`] sequences those
//! stages for any presentation layer; [`service`] is the collaborator port.

pub mod artifacts;
pub mod columns;
pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod params;
pub mod service;
