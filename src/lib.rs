//! Concurrent workload harness.
//!
//! A coordinator spawns a batch of workers, either forked processes
//! ([`spawner::process`]) or threads ([`spawner::thread`]), runs one of the kernels in
//! [`workloads`] in each, and collects exactly one outcome per worker before it
//! returns.

pub mod driver;
pub mod error;
pub mod spawner;
pub mod util;
pub mod workloads;
