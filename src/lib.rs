pub mod app;
pub mod bruteforcer;
pub mod cli;
pub mod config;
pub mod detector;
pub mod generator;
pub mod output;
pub mod request;
pub mod runner;
pub mod stats;
pub mod transform;
pub mod utils;

#[cfg(test)]
mod tests;
