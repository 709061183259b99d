pub mod config;
pub mod inference;
pub mod orchestrator;
pub mod routes;
pub mod storage;
