//! Request/response types for payment endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct InitializeRequest {
    pub course_id: Uuid,
    /// Amount in minor units (e.g. cents).
    pub amount_cents: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct InitializeResponse {
    pub success: bool,
    pub message: String,
    pub redirect_url: String,
    pub reference: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TransactionView {
    pub reference: String,
    pub status: String,
    pub course_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
    pub transaction: TransactionView,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn initialize_request_round_trips() -> Result<()> {
        let decoded: InitializeRequest = serde_json::from_str(
            r#"{"course_id":"3fa85f64-5717-4562-b3fc-2c963f66afa6","amount_cents":4999}"#,
        )?;
        assert_eq!(decoded.amount_cents, 4999);
        Ok(())
    }

    #[test]
    fn transaction_view_serializes_reference() -> Result<()> {
        let view = TransactionView {
            reference: "krs_01h2xcejqtf2nbrexx3vqjhp41".to_string(),
            status: "completed".to_string(),
            course_id: Uuid::nil(),
            amount_cents: 4999,
            currency: "USD".to_string(),
        };
        let value = serde_json::to_value(&view)?;
        assert_eq!(
            value.get("reference").and_then(serde_json::Value::as_str),
            Some("krs_01h2xcejqtf2nbrexx3vqjhp41")
        );
        Ok(())
    }
}
