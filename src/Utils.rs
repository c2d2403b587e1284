//! Small shared helpers: physical constants, unit conversions and logger setup.
pub mod logger;
pub mod units;
