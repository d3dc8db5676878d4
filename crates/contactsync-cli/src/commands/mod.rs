pub mod auth;
pub mod config;
pub mod contacts;
pub mod sync;
