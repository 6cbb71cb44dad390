//! Scaleway provider plugin core.
//!
//! This crate serves Scaleway resources to an infrastructure-as-code host
//! over gRPC. It is built from a few layers:
//!
//! - **Locality and identifiers** ([`locality`]): zones, regions and the
//!   `{locality}/{uuid}` identifier scheme.
//! - **Configuration** ([`config`], [`meta`]): credentials merged from the
//!   provider block, the environment and the config file, with a source
//!   tag per field, wrapped into one shared [`CredentialContext`].
//! - **API access** ([`client`], [`waiter`]): an authenticated HTTP client,
//!   a generation fallback for resources served by two API families, and a
//!   cancellable poller for asynchronous state transitions.
//! - **Schemas** ([`schema`], [`validators`], [`diff`], [`datasource`]):
//!   attribute declarations, validation, planning and data-source
//!   derivation.
//! - **Surfaces** ([`legacy`], [`framework`], [`mux`]): two ways to write a
//!   component, both served through one [`MuxProvider`].
//! - **Protocol** ([`server`]): the gRPC service and the handshake.
//!
//! # Running
//!
//! ```ignore
//! use scaleway_provider::{init_logging, provider, serve};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(provider::new()?).await
//! }
//! ```
//!
//! # Handshake
//!
//! On start the server prints one line to stdout:
//!
//! ```text
//! SCW_PROVIDER|5,6|127.0.0.1:50051
//! ```
//!
//! Format: `SCW_PROVIDER|<protocol versions>|<address>`. Both versions are
//! advertised because components of both surfaces are served.
//!
//! # Adding a component
//!
//! A typed component implements one of the [`framework`] traits:
//!
//! ```ignore
//! use scaleway_provider::framework::DataSource;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Model { region: Option<String> }
//!
//! struct Example;
//!
//! #[scaleway_provider::async_trait]
//! impl DataSource for Example {
//!     type Model = Model;
//!     fn type_name(&self) -> &'static str { "scaleway_example" }
//!     fn schema(&self) -> Schema { Schema::v0() }
//!     async fn read(&self, op: &OpContext, config: Model) -> Result<Model, ProviderError> {
//!         Ok(config)
//!     }
//! }
//! ```
//!
//! and is registered in [`provider::framework_surface`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod coercion;
pub mod config;
pub mod datasource;
pub mod diff;
pub mod error;
pub mod framework;
pub mod legacy;
pub mod locality;
pub mod logging;
pub mod meta;
pub mod mux;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;
pub mod validators;
pub mod waiter;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use meta::{CredentialContext, OpContext};
pub use mux::{MuxBuilder, MuxProvider};
pub use schema::ProviderSchema;
pub use server::{
    handshake_line, serve, serve_on, serve_on_with_options, serve_with_options, ProviderService,
    ServeOptions,
};
pub use types::{
    AttributeChange, ComponentKind, ImportedResource, Operation, PlanResult, ProviderMetadata,
    ServerCapabilities, Surface, Timeouts, HANDSHAKE_PREFIX, PROTOCOL_VERSIONS,
};
pub use validation::{is_valid, validate, validate_result};

pub use async_trait::async_trait;

pub use serde_json;
pub use tonic;
pub use tracing;
