//! Profile lookup implementations.

pub mod inmemory;

pub use inmemory::InMemoryProfileDirectory;
