pub mod fetch;
pub mod proxy;
pub mod stats;

pub use fetch::*;
pub use proxy::*;
pub use stats::*;
