//! servekit - configuration glue for axum servers and reqwest REST clients

pub mod config;
pub mod context;
pub mod error;

pub mod client;
pub mod server;

pub use client::{Client, ClientConfig};
pub use config::Config;
pub use context::Context;
pub use error::{Error, Result};
pub use server::{Server, ServerConfig};
