pub mod chat;
pub mod config;
pub mod context;
pub mod conversation;
pub mod http_client;
pub mod llm_client;
pub mod memory;
pub mod merge;
pub mod profile;
pub mod prompt;
pub mod relationship;
pub mod store;
pub mod turn;
pub mod updater;

#[cfg(test)]
mod testing;
