use thiserror::Error;

/// Errors raised while recording, scoring or optimizing a program.
///
/// All of these are programming errors: none of them is retried and a
/// failed step never touches the parameter store.
#[derive(Error, Debug)]
pub enum PplError {
    #[error("site '{0}' was already recorded in this trace")]
    DuplicateSite(String),

    #[error("latent site '{0}' of the model is not covered by the guide")]
    MissingGuideSite(String),

    #[error("no parameter named '{0}' in the store")]
    UnknownParameter(String),

    #[error("site '{0}' never appeared in any trace")]
    UnknownSite(String),

    #[error("site '{site}' in plate '{plate}' expects a leading dimension of {expected}, got {dims:?}")]
    PlateMismatch {
        plate: String,
        site: String,
        expected: usize,
        dims: Vec<usize>,
    },

    #[error("site '{name}' appeared in {found} of {expected} runs")]
    IncompleteSite {
        name: String,
        found: usize,
        expected: usize,
    },

    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("parameter store lock was poisoned")]
    StorePoisoned,

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PplError>;
