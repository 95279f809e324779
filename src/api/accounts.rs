use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::to_body;
use crate::client::error::ClientError;
use crate::client::ApiClient;
use crate::transport::{ApiRequest, Transport};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub full_name: String,
    pub email: String,
    pub account_type: String,
    /// Decimal string; strings are what the field codec seals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_deposit: Option<String>,
}

impl<T: Transport> ApiClient<T> {
    pub async fn all_accounts(&self) -> Result<Value, ClientError> {
        self.send(ApiRequest::get("/accounts")).await
    }

    pub async fn account_by_id(&self, account_id: &str) -> Result<Value, ClientError> {
        self.send(ApiRequest::get(format!("/accounts/{account_id}"))).await
    }

    pub async fn create_account(
        &self,
        account: &CreateAccountRequest,
    ) -> Result<Value, ClientError> {
        self.send(ApiRequest::post("/accounts", to_body(account)?)).await
    }
}
