use serde::{Deserialize, Serialize};

use crate::params::Parameters;
use crate::tensor::Tensor;
use crate::Inputs;

/// One `generate` call as it travels from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub inputs: Inputs,
    pub parameters: Parameters,
}

/// Why the server asks the client to send its request again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryReason {
    /// The request frame arrived but could not be decoded.
    CorruptFrame,

    /// The batch the request was part of failed in the compute backend.
    BatchFailed,
}

/// The server's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Output rows, one per input row, in input order.
    Output(Tensor),

    /// Send the same request again.
    Resend(RetryReason),

    /// The request is malformed and will never succeed.
    Rejected(String),
}
