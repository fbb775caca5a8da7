pub mod cfg;
pub mod common;
pub mod decoder;
pub mod error;
pub mod http;
pub mod metrics;
pub mod observer;
pub mod scanner;
pub mod serde_util;
pub mod storage;
#[cfg(test)]
mod test_util;
pub mod thorclient;
pub mod types;
