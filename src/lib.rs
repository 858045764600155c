pub mod app;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod extract;
pub mod index;
pub mod integrity;
pub mod output;
pub mod selection;
pub mod store;
pub mod transfer;
pub mod transport;
