//! A small typed RPC runtime over a single TCP connection: a service
//! registers named methods taking/returning builtin scalars, JSON messages,
//! or byte streams; a client dials in and calls them by `service.method`
//! name. See `original_source/` for the reference implementation this crate
//! reimplements idiomatically in async Rust.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use wirecall::codec::Value;
//! use wirecall::service::{ArgSpec, RetSpec, Service};
//! use wirecall::server::Server;
//! use wirecall::client::{CallArg, CallResult, Client};
//! use wirecall::request::{ArgValue, RetValue};
//! use wirecall::config::{ClientConfig, ServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let add = Service::builder("Math")
//!     .method(
//!         "Add",
//!         vec![ArgSpec::Normal("int32"), ArgSpec::Normal("int32")],
//!         RetSpec::Normal("int32"),
//!         std::sync::Arc::new(|args: Vec<ArgValue>| {
//!             Box::pin(async move {
//!                 let (ArgValue::Normal(Value::Int32(a)), ArgValue::Normal(Value::Int32(b))) =
//!                     (&args[0], &args[1])
//!                 else {
//!                     return Err(wirecall::error::RequestError::Message("bad args".into()));
//!                 };
//!                 Ok(RetValue::Normal(Value::Int32(a + b)))
//!             })
//!         }),
//!     )?
//!     .build();
//! wirecall::service::register(add)?;
//!
//! tokio::spawn(async move {
//!     let server = Server::new(ServerConfig::default());
//!     server.listen_and_serve("127.0.0.1:9000").await
//! });
//!
//! let client = Client::dial("127.0.0.1:9000", ClientConfig::default()).await?;
//! let result = client
//!     .call("Math", "Add", vec![CallArg::Normal(Value::Int32(2)), CallArg::Normal(Value::Int32(3))])
//!     .await?;
//! match result {
//!     CallResult::Normal(Value::Int32(sum)) => assert_eq!(sum, 5),
//!     _ => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod message;
pub mod request;
pub mod server;
pub mod service;

#[cfg(test)]
mod tests;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{ClientError, ProtocolError, RegisterError, RequestError};
pub use server::Server;
