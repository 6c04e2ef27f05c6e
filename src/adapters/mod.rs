//! Storage adapters implementing the domain ports.

pub mod postgres;
