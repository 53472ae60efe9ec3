use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
            error: None,
        }
    }

    /// Failure envelope that carries the record the request collided with, so
    /// clients can show the existing payment/submission/refund to the user.
    pub fn conflict(message: String, existing: T) -> Self {
        Self {
            success: false,
            message: None,
            data: Some(existing),
            error: Some(message),
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            message: None,
            data: None,
            error: Some(message),
        }
    }
}
