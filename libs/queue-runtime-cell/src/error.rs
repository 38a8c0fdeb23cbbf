use thiserror::Error;

use appointment_cell::AppointmentError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    PoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Webhook delivery failed: {0}")]
    WebhookError(String),

    #[error("Sweep failed: {0}")]
    SweepError(#[from] AppointmentError),
}
