//! Service lifecycle on top of tonic: listen, probe, publish, resolve.
//!
//! A [`MiniService`] binds its RPC and liveness listeners, publishes itself
//! into a [`Registry`] under a discovery tag, and deregisters when either
//! serve loop ends. A [`Resolver`] turns `(id, name)` back into a connection.

pub mod client;
pub mod config;
pub mod handler;
pub mod host;
mod lifecycle;
pub mod probe;
pub mod server;

pub use client::Resolver;
pub use config::ServiceConfig;
pub use handler::{HandlerRegistrar, ServerHandle};
pub use server::{MiniService, REGISTRATION_DELAY};

pub use miniservice_core::{
    CatalogEntry, Endpoint, Error, MemoryRegistry, Registry, RegistryRecord, Result,
    ServiceIdentity, tag,
};
