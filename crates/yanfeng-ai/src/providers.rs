pub mod base;
pub mod configs;
pub mod modelscope;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod mock;
