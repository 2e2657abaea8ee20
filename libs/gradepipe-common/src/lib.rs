pub mod error;
pub mod redis;
pub mod scoring;
pub mod types;
