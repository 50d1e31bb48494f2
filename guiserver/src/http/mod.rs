//! HTTP clients

pub mod charmworld;
pub mod client;
