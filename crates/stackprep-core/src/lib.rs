pub mod calibration;
pub mod catalog;
pub mod config;
pub mod consts;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod frame;
pub mod io;
pub mod log;
pub mod overscan;
pub mod pipeline;
pub mod rejection;
pub mod session;
pub mod weighting;
