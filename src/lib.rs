// YouTube Upload Agent - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod media;
pub mod middleware;
pub mod routes;
pub mod tools;
