//!
//! Crate errors
//!
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Pool '{0}' already exists")]
    DuplicatePoolName(String),
    #[error("No such pool '{0}'")]
    NoSuchPool(String),
    #[error("No pools configured")]
    NoPools,
    #[error("No members available")]
    NoMembersAvailable,
    #[error("Missing or invalid config value: {0}")]
    InvalidConfigValue(String),
    #[error("Worker factory failed: {0}")]
    FactoryError(String),
    #[error("Coordinator is shutting down")]
    Closed,
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for String {
    fn from(err: Error) -> String {
        format!("{}", err)
    }
}
