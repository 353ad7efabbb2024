//! Common test utilities for mft-engine integration tests

#[allow(dead_code)]
pub mod collaborators;
#[allow(dead_code)]
pub mod config;

#[allow(unused_imports)]
pub use collaborators::*;
#[allow(unused_imports)]
pub use config::*;
