pub mod cli;
pub mod config;
pub mod error;
pub mod ids;
pub mod json;
pub mod services;
pub mod spatial;
pub mod store;
pub mod time;

#[cfg(test)]
pub mod test_support;
