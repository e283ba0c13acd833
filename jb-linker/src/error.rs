use codegen::CodegenError;

/// Why a symbol could not be given a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// The symbol name does not decode to a class and method.
    Demangle(CodegenError),
    /// The runtime could not list classes or methods.
    Introspection(String),
    ClassNotFound { class: String },
    MethodNotFound { class: String, method: String },
}

impl std::fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionFailure::Demangle(err) => write!(f, "{err}"),
            ResolutionFailure::Introspection(message) => {
                write!(f, "runtime introspection failed: {message}")
            }
            ResolutionFailure::ClassNotFound { class } => write!(f, "class {class} not found"),
            ResolutionFailure::MethodNotFound { class, method } => {
                write!(f, "method {method} not found in class {class}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkerError {
    Codegen(CodegenError),
    ResolutionFailed {
        symbol: String,
        reason: ResolutionFailure,
    },
    LibraryLoadFailed {
        library: String,
        reason: String,
    },
    Config(String),
    /// The process-wide context was used before it was installed.
    NotArmed,
}

impl LinkerError {
    pub(crate) fn resolution(symbol: &str, reason: ResolutionFailure) -> Self {
        LinkerError::ResolutionFailed {
            symbol: symbol.to_string(),
            reason,
        }
    }

    pub(crate) fn load(library: &str, reason: impl Into<String>) -> Self {
        LinkerError::LibraryLoadFailed {
            library: library.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for LinkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkerError::Codegen(err) => write!(f, "{err}"),
            LinkerError::ResolutionFailed { symbol, reason } => {
                write!(f, "failed to resolve signature of {symbol}: {reason}")
            }
            LinkerError::LibraryLoadFailed { library, reason } => {
                write!(f, "failed to load {library}: {reason}")
            }
            LinkerError::Config(message) => write!(f, "invalid linker config: {message}"),
            LinkerError::NotArmed => write!(f, "linker context is not installed"),
        }
    }
}

impl std::error::Error for LinkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkerError::Codegen(err) => Some(err),
            LinkerError::ResolutionFailed {
                reason: ResolutionFailure::Demangle(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}

impl From<CodegenError> for LinkerError {
    fn from(value: CodegenError) -> Self {
        LinkerError::Codegen(value)
    }
}

pub type LinkerResult<T> = Result<T, LinkerError>;
