pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod images;
pub mod session;
pub mod state;
pub mod storage;
pub mod users;
