pub mod config;
pub mod content_codec;
pub mod credential_store;
pub mod error;
pub mod github_client;
pub mod recognition_client;
pub mod state_repository;
pub mod storage;
