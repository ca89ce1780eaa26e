use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("missing required field `{0}`")]
    MissingRequiredField(&'static str),

    #[error("`{field}` must be >= 0, got {value}")]
    InvalidNegativeValue { field: String, value: f64 },

    #[error("`{field}` is out of range: {detail}")]
    OutOfRange { field: String, detail: String },

    #[error("configuration gap in {table}: {detail}")]
    ConfigurationGap { table: &'static str, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "loan payment {payment} does not exceed monthly interest {interest}; the loan never amortizes"
    )]
    NonConvergentAmortization { payment: f64, interest: f64 },

    #[error("projection cancelled after {completed_months} months")]
    Cancelled { completed_months: u32 },
}

impl EngineError {
    pub fn negative(field: impl Into<String>, value: f64) -> Self {
        EngineError::InvalidNegativeValue {
            field: field.into(),
            value,
        }
    }

    pub fn out_of_range(field: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::OutOfRange {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
