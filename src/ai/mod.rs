mod cloud_api;
mod context;
mod nl2sql;
mod prompt;
mod retriever;
#[cfg(test)]
pub(crate) mod testing;

pub use cloud_api::*;
pub use context::*;
pub use nl2sql::*;
pub use prompt::{compose, system_message, MAX_SAMPLE_TABLES};
pub use retriever::*;
