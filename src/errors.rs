pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bar data provided is empty. A backtest requires at least one bar.
    #[error("Bar data is empty: a run requires at least one bar")]
    EmptyBarData,

    /// A bar arrived whose open time does not strictly advance the previous
    /// bar's open time. Out-of-order and duplicate bars fail the run.
    #[error("Out-of-order bar: open time {offending} does not advance {last}")]
    OutOfOrderBar {
        /// Open time of the last accepted bar.
        last: chrono::DateTime<chrono::Utc>,
        /// Open time of the rejected bar.
        offending: chrono::DateTime<chrono::Utc>,
    },

    /// A bar failed construction-time validation (inconsistent high/low,
    /// non-finite price, negative volume, close time before open time).
    #[error("Malformed bar: {0}")]
    MalformedBar(String),

    /// The initial or current balance is not positive. Trading requires a positive balance.
    #[error("Balance must be positive (got: {0})")]
    NegZeroBalance(f64),

    /// A percentage input (fee, stop level, sizing fraction) is outside its
    /// usable range.
    #[error("Percentage out of range for {name}: {value}")]
    PercentOutOfRange {
        /// Which configuration knob was rejected.
        name: &'static str,
        /// The offending value.
        value: f64,
    },

    /// The account does not have enough cash to fund an entry.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Cash the entry would need, fee included.
        required: f64,
        /// Cash currently available.
        available: f64,
    },

    /// The order-execution collaborator rejected a fill request.
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// The order-execution collaborator did not resolve a fill request
    /// within the configured bound.
    #[error("Order timed out after {0:?}")]
    OrderTimeout(std::time::Duration),

    /// A strategy parameter value is outside its declared range or has the
    /// wrong type.
    #[error("Invalid parameter `{name}`: {detail}")]
    InvalidParameter {
        /// Parameter name as declared in the schema.
        name: String,
        /// What was wrong with it.
        detail: String,
    },

    /// A parameter set names a parameter the strategy never declared.
    #[error("Unknown parameter `{0}`")]
    UnknownParameter(String),

    /// A declared parameter range cannot produce any values (reversed
    /// bounds, non-positive step, or an empty choice list).
    #[error("Invalid parameter range for `{name}`: {detail}")]
    InvalidRange {
        /// Parameter name as declared in the space.
        name: String,
        /// What was wrong with the range.
        detail: String,
    },

    /// The declared search space has no parameters at all.
    #[error("Parameter space is empty")]
    EmptyParameterSpace,

    /// Two indicators were registered under the same name.
    #[error("Duplicate indicator name `{0}`")]
    DuplicateIndicator(String),

    /// An unreachable context was encountered. This is likely a bug.
    #[error("Unreachable context (internal error): {0}")]
    Unreachable(String),

    /// I/O error occurred.
    // utils.rs
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is a recoverable execution failure: the tick it
    /// occurred on is abandoned, position state is untouched, and the run
    /// carries on with the next bar.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Error::InsufficientFunds { .. } | Error::OrderRejected(_) | Error::OrderTimeout(_)
        )
    }
}

#[cfg(test)]
#[test]
fn execution_failures_are_recoverable() {
    assert!(
        Error::OrderRejected("exchange said no".into()).is_execution_failure()
    );
    assert!(
        Error::OrderTimeout(std::time::Duration::from_secs(5)).is_execution_failure()
    );
    assert!(
        Error::InsufficientFunds {
            required: 10.0,
            available: 1.0
        }
        .is_execution_failure()
    );
    assert!(!Error::EmptyBarData.is_execution_failure());
    assert!(
        !Error::OutOfOrderBar {
            last: chrono::DateTime::default(),
            offending: chrono::DateTime::default()
        }
        .is_execution_failure()
    );
}
