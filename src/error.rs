use crate::types::DataType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: DataType, found: String },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("session limit reached ({0} live sessions)")]
    CapacityExceeded(usize),

    #[error("config error: {0}")]
    Config(String),

    #[cfg(feature = "gpu")]
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by front-ends to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Compile,
    NotFound,
    TypeMismatch,
    Execution,
    CapacityExceeded,
    Internal,
}

impl Error {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Error::Validation(msg.into())
    }

    pub fn compile<S: Into<String>>(msg: S) -> Self {
        Error::Compile(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Error::Execution(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn type_mismatch<S: Into<String>>(expected: DataType, found: S) -> Self {
        Error::TypeMismatch {
            expected,
            found: found.into(),
        }
    }

    #[cfg(feature = "gpu")]
    pub fn gpu<S: Into<String>>(msg: S) -> Self {
        Error::Gpu(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Compile(_) => ErrorKind::Compile,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::Execution(_) => ErrorKind::Execution,
            Error::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            Error::Config(_) | Error::Io(_) | Error::Json(_) => ErrorKind::Internal,
            #[cfg(feature = "gpu")]
            Error::Gpu(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::compile("bad").kind(), ErrorKind::Compile);
        assert_eq!(Error::not_found("abc").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::type_mismatch(DataType::Uint32, "FLOAT").kind(),
            ErrorKind::TypeMismatch
        );
        assert_eq!(Error::config("x").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_display() {
        let err = Error::type_mismatch(DataType::Uint32, "FLOAT");
        assert_eq!(err.to_string(), "type mismatch: expected UINT32, found FLOAT");
    }
}
