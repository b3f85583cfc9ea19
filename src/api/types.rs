//! API request and response types

use serde::{Deserialize, Serialize};

/// Request to relay one message
#[derive(Debug, Deserialize)]
pub struct EnviarMensajeRequest {
    #[serde(default)]
    pub telefono: Option<String>,
    #[serde(default)]
    pub mensaje: Option<String>,
}

/// Response for a dispatched message
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error payload, also used for the soft "no sessions" outcome
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Response for the pool status probe
#[derive(Debug, Serialize)]
pub struct EstadoResponse {
    pub sesiones: usize,
}
