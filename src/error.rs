use thiserror::Error;

/// Broad classes of failure a processing pass can report.
///
/// Every [`Error`] maps onto exactly one kind so that a caller can decide how to
/// surface it without matching on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A user supplied numeric field is not a number or is out of range.
    Parameter,
    /// The requested configuration cannot be run (unknown method, missing
    /// reference set, incompatible coordinate systems, unsorted inputs).
    Configuration,
    /// There is nothing to process. Informational, not a failure.
    EmptyInput,
}

/// Errors that abort a processing pass.
#[derive(Error, Debug)]
pub enum Error {
    #[error("parameter `{field}` is not a number: {value:?}")]
    NotANumber { field: &'static str, value: String },

    #[error("parameter `{field}` is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("{method} takes {expected} parameter(s), {found} given")]
    ParameterCount {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown threshold method `{0}`")]
    UnknownMethod(String),

    #[error("threshold method `{0}` is not available in this backend")]
    UnsupportedMethod(String),

    #[error("cross-channel association requested without a reference region set")]
    MissingReference,

    #[error("reference region set does not match the raster: {0}")]
    CoordinateMismatch(String),

    #[error("{what} must be sorted by {key} ascending (first violation at index {index})")]
    Unsorted {
        what: &'static str,
        key: &'static str,
        index: usize,
    },

    #[error("raster has {count} plane(s), plane {index} requested")]
    NoSuchPlane { index: usize, count: usize },

    #[error("nothing to process: {0}")]
    EmptyInput(&'static str),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotANumber { .. } | Error::OutOfRange { .. } | Error::ParameterCount { .. } => {
                ErrorKind::Parameter
            }
            Error::UnknownMethod(_)
            | Error::UnsupportedMethod(_)
            | Error::MissingReference
            | Error::CoordinateMismatch(_)
            | Error::Unsorted { .. }
            | Error::NoSuchPlane { .. }
            | Error::Json(_) => ErrorKind::Configuration,
            Error::EmptyInput(_) => ErrorKind::EmptyInput,
        }
    }

    /// Returns `true` when the error is a notice for the user rather than a failure.
    pub fn is_informational(&self) -> bool {
        self.kind() == ErrorKind::EmptyInput
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parses a user supplied decimal field.
///
/// Surrounding whitespace is ignored. Anything else that `f64::from_str` rejects,
/// as well as NaN and infinities, is reported as [`Error::NotANumber`].
pub(crate) fn parse_number(field: &'static str, text: &str) -> Result<f64> {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(Error::NotANumber {
            field,
            value: text.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let e = Error::NotANumber {
            field: "sigma",
            value: "abc".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Parameter);
        assert_eq!(Error::MissingReference.kind(), ErrorKind::Configuration);
        assert_eq!(
            Error::UnknownMethod("Foo".into()).kind(),
            ErrorKind::Configuration
        );
        assert!(Error::EmptyInput("no image").is_informational());
        assert!(!Error::MissingReference.is_informational());
    }

    #[test]
    fn parse_number_rejects_text_and_non_finite() {
        assert_eq!(parse_number("x", " 2.5 ").unwrap(), 2.5);
        assert!(matches!(
            parse_number("x", "ten"),
            Err(Error::NotANumber { field: "x", .. })
        ));
        assert!(parse_number("x", "NaN").is_err());
        assert!(parse_number("x", "inf").is_err());
        assert!(parse_number("x", "").is_err());
    }
}
