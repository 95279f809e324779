use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::to_body;
use crate::client::error::ClientError;
use crate::client::ApiClient;
use crate::transport::{ApiRequest, Transport};

// Ids and amounts travel as strings so the field codec can seal them.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub account_id: String,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub type WithdrawRequest = DepositRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_account_id: String,
    pub to_account_number: String,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl<T: Transport> ApiClient<T> {
    pub async fn history(&self, account_id: &str) -> Result<Value, ClientError> {
        self.send(ApiRequest::get(format!("/transactions/history/{account_id}")))
            .await
    }

    pub async fn deposit(&self, deposit: &DepositRequest) -> Result<Value, ClientError> {
        self.send(ApiRequest::post("/transactions/deposit", to_body(deposit)?))
            .await
    }

    pub async fn withdraw(&self, withdrawal: &WithdrawRequest) -> Result<Value, ClientError> {
        self.send(ApiRequest::post("/transactions/withdraw", to_body(withdrawal)?))
            .await
    }

    pub async fn transfer(&self, transfer: &TransferRequest) -> Result<Value, ClientError> {
        self.send(ApiRequest::post("/transactions/transfer", to_body(transfer)?))
            .await
    }

    pub async fn by_date_range(
        &self,
        start_date: &str,
        end_date: &str,
        page: u32,
        size: u32,
    ) -> Result<Value, ClientError> {
        self.send(
            ApiRequest::get("/transactions/date-range")
                .with_query("startDate", start_date)
                .with_query("endDate", end_date)
                .with_query("page", page)
                .with_query("size", size),
        )
        .await
    }
}
