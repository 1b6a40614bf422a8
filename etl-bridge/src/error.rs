use etl::error::EtlError;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Captured backtrace wrapper to avoid thiserror's unstable feature detection.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the bridge binary.
///
/// Wraps [`EtlError`] for failures while processing invocations and provides variants for
/// startup and input failures.
#[derive(Debug)]
pub enum BridgeError {
    /// Invocation processing error.
    Etl(EtlError),
    /// Configuration or telemetry setup error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// Failure reading invocations or writing output.
    Io(std::io::Error, CapturedBacktrace),
}

impl BridgeError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            BridgeError::Etl(_) => "bridge error",
            BridgeError::Config(_, _) => "configuration error",
            BridgeError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> &Backtrace {
        match self {
            BridgeError::Etl(err) => err.backtrace(),
            BridgeError::Config(_, captured) => &captured.0,
            BridgeError::Io(_, captured) => &captured.0,
        }
    }

    /// Creates a configuration error from any error source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        BridgeError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("bridge failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace() {
            out.push_str("backtrace:\n");
            out.push_str(&self.backtrace().to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for BridgeError {
    /// Renders a one-line description for terminal and log output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Etl(err) => write!(f, "{err}"),
            BridgeError::Config(source, _) => write!(f, "configuration error: {source}"),
            BridgeError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for BridgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BridgeError::Etl(err) => err.source(),
            BridgeError::Config(source, _) => Some(source.as_ref()),
            BridgeError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<EtlError> for BridgeError {
    fn from(err: EtlError) -> Self {
        BridgeError::Etl(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl::error::ErrorKind;
    use etl::etl_error;

    #[test]
    fn report_lists_category_and_causes() {
        let io = std::io::Error::other("disk unplugged");
        let err = BridgeError::from(etl_error!(
            ErrorKind::IoError,
            "Failed to read invocation",
            source: io
        ));

        let report = err.render_report();

        assert!(report.starts_with("bridge failed\ncategory: bridge error\n"));
        assert!(report.contains("Failed to read invocation"));
        assert!(report.contains("cause 1: disk unplugged"));
    }
}
