pub mod cli;
pub mod clients;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod event;
pub mod payload;
