pub mod aggregator;
pub mod config;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod metadata;
pub mod persistence;
pub mod recovery;
pub mod registry;

#[cfg(test)]
mod tests;

pub use aggregator::*;
pub use config::*;
pub use error::*;
pub use hooks::*;
pub use manager::*;
pub use metadata::*;
pub use persistence::*;
pub use recovery::*;
pub use registry::*;
