use thiserror::Error;

/// Failure of a schema build.
///
/// `Contract` marks a malformed input or an internal precondition violation;
/// the other variants are environmental and leave the input schema untouched.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Sampling failed: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Build interrupted")]
    Interrupted,

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

/// Failure reported by a [`crate::SampleCollector`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("No sample column for {class}.{field}")]
    MissingColumn { class: String, field: String },

    #[error("Sample column {class}.{field} does not hold {expected} values")]
    KindMismatch { class: String, field: String, expected: &'static str },

    #[error("Field {class}.{field} is not loaded in the reduced schema")]
    NotLoaded { class: String, field: String },

    #[error("Sampling interrupted")]
    Interrupted,

    #[error("{0}")]
    Failed(String),
}

/// Failure of [`crate::Formula::parse`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Unexpected character at offset {0}")]
    UnexpectedChar(usize),

    #[error("Unexpected token `{found}` at offset {offset}, expected {expected}")]
    UnexpectedToken { found: String, offset: usize, expected: &'static str },

    #[error("Unexpected end of formula, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("Invalid number `{0}`")]
    InvalidNumber(String),
}
