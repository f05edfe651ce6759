//! Per-band attenuation model and the visitor protocol that accumulates
//! per-receiver levels.

pub mod bands;
pub mod parameters;
pub mod path;
pub mod visitor;
