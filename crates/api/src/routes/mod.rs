//! HTTP Routes

pub mod data;
pub mod metrics;
