// src/lib.rs

//! docdrain: reading-room collection drain library

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
