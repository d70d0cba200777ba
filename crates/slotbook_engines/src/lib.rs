#![forbid(unsafe_code)]

pub mod admission;
pub mod dedup;
pub mod grouping;
pub mod occupancy;
pub mod ordering;
pub mod refcode;
pub mod render;
