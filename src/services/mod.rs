//! Background services

pub mod pool_maintainer;

pub use pool_maintainer::{PoolMaintainer, PoolMaintainerConfig, PoolMaintainerHandle};
