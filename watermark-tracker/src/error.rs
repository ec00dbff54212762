use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The offset is further ahead of the watermark than a bounded tracker may represent.
    #[error("OutOfRange Error - offset {offset} is beyond the highest trackable offset {max}")]
    OutOfRange { offset: i64, max: i64 },

    #[error("Config Error - {0}")]
    Config(String),
}
