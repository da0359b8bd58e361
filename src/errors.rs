use thiserror::Error;

/// Boxed cause carried by mapping and write failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for row mapping, join stitching and repository writes.
///
/// Errors of this type are never re-wrapped: once raised they travel through
/// `?` unchanged so the original diagnostic survives. Only foreign errors
/// (driver, JSON, timestamp parsing) are wrapped, with the cause kept as
/// [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum RowMapError {
    /// Construction-time misconfiguration. Always a code defect.
    #[error("setup error: {0}")]
    SetupError(String),
    #[error("mapping error: {message}")]
    MappingError {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("write failure: {message}")]
    WriteFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("too many results: {0}")]
    TooManyResults(String),
}

impl RowMapError {
    pub fn setup<T: Into<String>>(msg: T) -> Self {
        RowMapError::SetupError(msg.into())
    }

    pub fn mapping<T: Into<String>>(msg: T) -> Self {
        RowMapError::MappingError {
            message: msg.into(),
            source: None,
        }
    }

    pub fn mapping_caused<T, E>(msg: T, cause: E) -> Self
    where
        T: Into<String>,
        E: Into<BoxError>,
    {
        RowMapError::MappingError {
            message: msg.into(),
            source: Some(cause.into()),
        }
    }

    pub fn write<T: Into<String>>(msg: T) -> Self {
        RowMapError::WriteFailure {
            message: msg.into(),
            source: None,
        }
    }

    pub fn write_caused<T, E>(msg: T, cause: E) -> Self
    where
        T: Into<String>,
        E: Into<BoxError>,
    {
        RowMapError::WriteFailure {
            message: msg.into(),
            source: Some(cause.into()),
        }
    }

    pub fn too_many<T: Into<String>>(msg: T) -> Self {
        RowMapError::TooManyResults(msg.into())
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, RowMapError::SetupError(_))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, RowMapError::MappingError { .. })
    }

    pub fn is_write_failure(&self) -> bool {
        matches!(self, RowMapError::WriteFailure { .. })
    }

    pub fn is_too_many(&self) -> bool {
        matches!(self, RowMapError::TooManyResults(_))
    }
}
