#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] switchboard_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
