pub mod common;
pub mod config;
pub mod data;
pub mod sync;
pub mod visits;
