use serde::{Deserialize, Serialize};

/// Error body returned by the REST and storage APIs.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorResponse {
    pub fn into_message(self) -> Option<String> {
        self.message.or(self.error)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    pub signed_url: String,
}
