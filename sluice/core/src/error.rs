use crate::{
    destinations::LoadError, ledger::LedgerError, sources::SourceError, staging::StagingError,
    templating::TemplateError,
};

use miette::Diagnostic;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors that abort a pipeline run
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    Source(Box<SourceError>),

    #[error(transparent)]
    Staging(Box<StagingError>),

    #[error(transparent)]
    Ledger(Box<LedgerError>),

    #[error(transparent)]
    Load(Box<LoadError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(Box<TemplateError>),
}

impl From<SourceError> for Error {
    fn from(error: SourceError) -> Self {
        Error::Source(Box::new(error))
    }
}

impl From<StagingError> for Error {
    fn from(error: StagingError) -> Self {
        Error::Staging(Box::new(error))
    }
}

impl From<LedgerError> for Error {
    fn from(error: LedgerError) -> Self {
        Error::Ledger(Box::new(error))
    }
}

impl From<LoadError> for Error {
    fn from(error: LoadError) -> Self {
        Error::Load(Box::new(error))
    }
}

impl From<TemplateError> for Error {
    fn from(error: TemplateError) -> Self {
        Error::Template(Box::new(error))
    }
}
