//! # Teppan
//!
//! A batching inference server reached over local IPC. Many processes share
//! one expensive compute backend (typically a large generative model) by
//! sending it requests that the server combines into batches.
//!
//! ## Overview
//!
//! Clients send named input tensors plus a bag of generation parameters.
//! The server groups pending requests whose parameters are exactly equal,
//! and on every tick runs one group's rows through the backend as a single
//! batch, bounded by a per-round capacity. A request larger than one round
//! is served across several rounds; its rows come back in their original
//! order once all of them are done.
//!
//! ### Assumptions
//! Regardless of backend used, teppan reserves two dimensions with special meanings:
//!  - The `0th` dimension is reserved as the batch dimension
//!  - The `1st` dimension, where present, is the sequence dimension
//!  - Tensors may fill in other dimensions
//!
//! Sequences of different lengths are left-padded to a common length before
//! they are batched, and the padding is stripped from each request's output.
//!
//! ## Architecture
//!
//! ### Transport
//!
//! One address per backend identity, resolved to a Unix domain socket or a
//! Windows named pipe. Messages are length-prefixed MessagePack frames; see
//! [`transport`].
//!
//! ### Compute Backend
//!
//! [`ComputeBackend`] is the single seam to the model. A failure in it is
//! reported to every request in the batch, whose clients resend.
//!
//! ### Server
//!
//! [`Server`] runs a listener, one handler per connection, the batch
//! scheduler and an idle monitor that stops the server once no client has
//! been connected for a while.
//!
//! ### Client
//!
//! [`Client`] keeps one connection, retries failed batches and lost
//! connections within a budget, and can start a server in-process when none
//! is running.
//!
//! ## Features
//!
//! - **candle** - Conversions between [`Tensor`] and candle tensors
//! - **burn** - Conversions between [`Tensor`] and burn tensor data
//!

mod core;

pub mod backend;
pub mod client;
pub mod communication;
pub mod config;
pub mod error;
pub mod params;
pub mod server;
pub mod tensor;
pub mod transport;

use indexmap::IndexMap;

/// Named input tensors of one request or batch, all sharing the batch dimension.
pub type Inputs = IndexMap<String, tensor::Tensor>;

/// Constants for client reference
pub use tensor::constant;

pub use backend::ComputeBackend;
pub use client::Client;
pub use communication::{Request, Response, RetryReason};
pub use config::{ClientConfig, ServerConfig};
pub use error::{ClientError, ComputeFailure, ServerError, TensorError, TransportError};
pub use params::{GroupKey, ParamValue, Parameters};
pub use server::{Server, ServerHandle};
pub use tensor::{Tensor, TensorData};
pub use transport::Address;
