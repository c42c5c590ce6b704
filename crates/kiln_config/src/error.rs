//! Errors raised while reading `kiln.toml`.

use std::path::PathBuf;

/// Why a configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// The configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML or does not match the expected schema,
    /// including unknown cache modes and hashing policies.
    #[error("invalid configuration: {reason}")]
    Parse {
        /// Parser message, with location.
        reason: String,
    },

    /// A setting that must be non-empty is empty.
    #[error("`{key}` must not be empty")]
    Empty {
        /// Dotted key of the setting, such as `cache.dir`.
        key: &'static str,
    },

    /// A setting is out of its allowed range.
    #[error("`{key}` {reason}")]
    OutOfRange {
        /// Dotted key of the setting.
        key: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_names_the_key() {
        let err = ConfigError::Empty { key: "cache.dir" };
        assert_eq!(err.to_string(), "`cache.dir` must not be empty");
    }

    #[test]
    fn out_of_range_display() {
        let err = ConfigError::OutOfRange {
            key: "build.max_depth",
            reason: "must be at least 1",
        };
        assert_eq!(err.to_string(), "`build.max_depth` must be at least 1");
    }

    #[test]
    fn read_error_names_the_file() {
        let err = ConfigError::Read {
            path: PathBuf::from("/p/kiln.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().starts_with("cannot read /p/kiln.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
