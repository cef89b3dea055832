use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid phone number format: {supplied}")]
    InvalidPhoneFormat { supplied: String },

    #[error("Gateway rejected payment {reference} after {attempts} attempt(s): {message}")]
    GatewayRejected {
        reference: String,
        message: String,
        attempts: usize,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::InvalidPhoneFormat { .. } => false,
            PaymentError::GatewayRejected { .. } => true,
            PaymentError::NetworkError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::SerializationError { .. } => false,
            PaymentError::StorageError { .. } => true,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::InvalidPhoneFormat { .. } => 400,
            PaymentError::GatewayRejected { .. } => 502,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::ProviderError { .. } => 502,
            PaymentError::SerializationError { .. } => 500,
            PaymentError::StorageError { .. } => 503,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ValidationError { .. } => "VALIDATION_ERROR",
            PaymentError::InvalidPhoneFormat { .. } => "INVALID_PHONE_FORMAT",
            PaymentError::GatewayRejected { .. } => "GATEWAY_REJECTED",
            PaymentError::NetworkError { .. } => "NETWORK_ERROR",
            PaymentError::ProviderError { .. } => "PROVIDER_ERROR",
            PaymentError::SerializationError { .. } => "SERIALIZATION_ERROR",
            PaymentError::StorageError { .. } => "STORAGE_ERROR",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::InvalidPhoneFormat { .. } => {
                "Invalid phone number. Use a local number such as 0712345678 or the \
                 international 255 form"
                    .to_string()
            }
            PaymentError::GatewayRejected { message, .. } => {
                format!("Payment could not be started: {}. Please try again", message)
            }
            PaymentError::NetworkError { .. } => {
                "Payment service is temporarily unavailable. Please try again shortly".to_string()
            }
            PaymentError::ProviderError { .. } => {
                "Payment provider returned an error".to_string()
            }
            PaymentError::SerializationError { .. } => {
                "An internal error occurred while preparing the payment".to_string()
            }
            PaymentError::StorageError { .. } => {
                "Payment service is temporarily unavailable. Please try again shortly".to_string()
            }
        }
    }

    /// Transaction reference carried by the error, when one exists. Gateway
    /// rejections keep the reference so the client can resubmit the same
    /// logical request.
    pub fn transaction_reference(&self) -> Option<&str> {
        match self {
            PaymentError::GatewayRejected { reference, .. } => Some(reference),
            _ => None,
        }
    }
}
