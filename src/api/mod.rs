//! Typed operations over [`ApiClient`](crate::client::ApiClient), one module
//! per backend service.
pub mod accounts;
pub mod auth;
pub mod transactions;

use serde::Serialize;
use serde_json::Value;

use crate::client::error::ClientError;

pub use accounts::CreateAccountRequest;
pub use auth::{LoginRequest, ProfileUpdateRequest, SignUpRequest};
pub use transactions::{DepositRequest, TransferRequest, WithdrawRequest};

pub(crate) fn to_body<T: Serialize>(payload: &T) -> Result<Value, ClientError> {
    serde_json::to_value(payload)
        .map_err(|e| ClientError::InvalidRequest(format!("serialize body: {e}")))
}
