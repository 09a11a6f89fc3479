use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    #[serde(default = "empty_object")]
    pub parameters: Value,
    pub access_token: String,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Serialize)]
pub struct NotFoundResponse {
    pub job_id: String,
    pub status: &'static str,
}

impl NotFoundResponse {
    pub fn new(job_id: String) -> Self {
        Self {
            job_id,
            status: "NOT_FOUND",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
