use std::error::Error;
use std::sync::Arc;
use std::{fmt, io};

/// Failures that end a run. Timeouts and stray or malformed replies are not
/// errors; they show up in the per-probe results instead.
#[derive(Debug, Clone)]
pub enum ProbeError {
    /// The host name did not resolve to any address.
    Resolution { host: String, source: Option<Arc<io::Error>> },
    /// The socket could not be opened, configured, written or read.
    Socket { context: &'static str, source: Arc<io::Error> },
}

impl ProbeError {
    pub fn resolution(host: &str, source: Option<io::Error>) -> ProbeError {
        ProbeError::Resolution { host: host.to_string(), source: source.map(Arc::new) }
    }

    pub fn socket(context: &'static str, source: io::Error) -> ProbeError {
        ProbeError::Socket { context, source: Arc::new(source) }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Resolution { host, source: Some(e) } => {
                write!(f, "unable to resolve {}: {}", host, e)
            }
            ProbeError::Resolution { host, source: None } => {
                write!(f, "unable to resolve {}: no addresses", host)
            }
            ProbeError::Socket { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::Resolution { source, .. } => {
                source.as_deref().map(|e| e as &(dyn Error + 'static))
            }
            ProbeError::Socket { source, .. } => Some(&**source as &(dyn Error + 'static)),
        }
    }
}
