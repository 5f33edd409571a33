use thiserror::Error;

/// Base error hierarchy shared by the host crates.
///
/// Domain crates (`access`, `platform`) keep their own error enums; this one
/// covers the ambient concerns: I/O, configuration and scheduling.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl HostError {
    pub fn error_code(&self) -> &'static str {
        match self {
            HostError::Io(_) => "IO_ERROR",
            HostError::Configuration(_) => "CONFIG_ERROR",
            HostError::InvalidSchedule(_) => "SCHEDULE_ERROR",
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// `host_error!(Configuration, "missing {}", key)`
#[macro_export]
macro_rules! host_error {
    ($variant:ident, $($arg:tt)*) => {
        $crate::errors::HostError::$variant(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = host_error!(Configuration, "missing {}", "port");
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert_eq!(err.to_string(), "Configuration error: missing port");

        let err = host_error!(InvalidSchedule, "every {}", "tuesday");
        assert_eq!(err.error_code(), "SCHEDULE_ERROR");
    }

    #[test]
    fn test_io_errors_convert() {
        fn read() -> HostResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?
        }
        let err = read().unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
        assert!(err.to_string().starts_with("IO error"));
    }
}
