#![deny(dead_code)]
#![deny(unused_imports)]

pub mod data;
pub mod estimate;
pub mod graph;
pub mod infer;
pub mod model;
pub mod report;
