//! HTTP API: request pipeline, server lifecycle and the demo catalog service.

pub mod app;
pub mod background;
pub mod config;
pub mod context;
pub mod middleware;
pub mod server;
