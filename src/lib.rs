// src/lib.rs
pub mod config;
pub mod handlers;
pub mod models;
pub mod protocols;
pub mod resync;
pub mod scheduler;
pub mod sink;
pub mod storage;
pub mod utils;
