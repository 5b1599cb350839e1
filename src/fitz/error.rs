//! Error handling for the interpreter core

use std::io;
use thiserror::Error;

/// The main error type for interpreter operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Generic(String),
    #[error("System error: {0}")]
    System(#[from] io::Error),
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Type error: {0}")]
    Type(String),
    #[error("Range error: {0}")]
    Range(String),
    #[error("Limit exceeded: {0}")]
    Limit(String),
    #[error("Undefined: {0}")]
    Undefined(String),
    #[error("Format error: {0}")]
    Format(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Unexpected end of stream")]
    Eof,
    #[error("Operation aborted")]
    Abort,
}

impl Error {
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Error::Generic(msg.into())
    }
    pub fn syntax<S: Into<String>>(msg: S) -> Self {
        Error::Syntax(msg.into())
    }
    pub fn typecheck<S: Into<String>>(msg: S) -> Self {
        Error::Type(msg.into())
    }
    pub fn range<S: Into<String>>(msg: S) -> Self {
        Error::Range(msg.into())
    }
    pub fn limit<S: Into<String>>(msg: S) -> Self {
        Error::Limit(msg.into())
    }
    pub fn undefined<S: Into<String>>(msg: S) -> Self {
        Error::Undefined(msg.into())
    }
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::Format(msg.into())
    }
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_syntax() {
        let e = Error::syntax("bad box length");
        assert!(matches!(e, Error::Syntax(_)));
        assert!(format!("{}", e).contains("bad box length"));
    }

    #[test]
    fn test_error_typecheck() {
        let e = Error::typecheck("expected dictionary");
        assert!(matches!(e, Error::Type(_)));
        assert!(format!("{}", e).contains("expected dictionary"));
    }

    #[test]
    fn test_error_range() {
        let e = Error::range("PaintType 3");
        assert!(matches!(e, Error::Range(_)));
    }

    #[test]
    fn test_error_limit() {
        let e = Error::limit("loop detector frames");
        assert!(matches!(e, Error::Limit(_)));
    }

    #[test]
    fn test_error_undefined() {
        let e = Error::undefined("no such resource");
        assert!(matches!(e, Error::Undefined(_)));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::System(_)));
    }

    #[test]
    fn test_error_eof() {
        assert!(format!("{}", Error::Eof).contains("end of stream"));
    }

    #[test]
    fn test_result_type() {
        fn returns_err() -> Result<i32> {
            Err(Error::generic("error"))
        }
        assert!(returns_err().is_err());
    }
}
