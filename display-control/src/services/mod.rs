//! Service layer.

pub mod container;

pub use container::ServiceContainer;
