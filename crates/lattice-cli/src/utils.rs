//! CLI utility functions

use lattice_types::{LatticeError, Result};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup logging based on verbosity level
pub fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let log_level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    let filter = if verbose || quiet {
        EnvFilter::new(log_level.to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|e| LatticeError::internal(format!("Failed to install logger: {}", e)))
}

/// Process exit code for a fatal error
pub fn exit_code(error: &LatticeError) -> i32 {
    if error.is_configuration() {
        -1
    } else {
        1
    }
}

/// Pick the error that explains a failed run.
///
/// Ranks released by an abort report communication errors; the rank that
/// triggered the abort carries the actual cause.
pub fn root_cause<'a, I>(errors: I) -> Option<&'a LatticeError>
where
    I: IntoIterator<Item = &'a LatticeError>,
{
    let mut first = None;
    for error in errors {
        if !matches!(error, LatticeError::Communication { .. }) {
            return Some(error);
        }
        first.get_or_insert(error);
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_exit_with_minus_one() {
        assert_eq!(exit_code(&LatticeError::topology("bad grid")), -1);
        assert_eq!(exit_code(&LatticeError::config("missing key")), -1);
        assert_eq!(exit_code(&LatticeError::engine("kernel failed")), 1);
        assert_eq!(exit_code(&LatticeError::communication("aborted")), 1);
    }

    #[test]
    fn root_cause_skips_abort_fallout() {
        let errors = vec![
            LatticeError::communication("process group aborted"),
            LatticeError::engine("injected"),
            LatticeError::communication("process group aborted"),
        ];
        assert!(matches!(root_cause(&errors), Some(LatticeError::Engine { .. })));

        let only_comm = vec![LatticeError::communication("a")];
        assert!(matches!(root_cause(&only_comm), Some(LatticeError::Communication { .. })));
        assert!(root_cause(Vec::<&LatticeError>::new()).is_none());
    }
}
