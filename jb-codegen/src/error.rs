#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    MalformedSignature {
        descriptor: String,
        reason: String,
    },
    MalformedSymbolName {
        symbol: String,
        reason: String,
    },
    NameTooLong {
        len: usize,
        limit: usize,
    },
    UnencodableTag(char),
    CodeGenFailed(String),
}

impl CodegenError {
    pub(crate) fn signature(descriptor: &str, reason: impl Into<String>) -> Self {
        CodegenError::MalformedSignature {
            descriptor: descriptor.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn symbol(symbol: &str, reason: impl Into<String>) -> Self {
        CodegenError::MalformedSymbolName {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::MalformedSignature { descriptor, reason } => {
                write!(f, "malformed signature '{descriptor}': {reason}")
            }
            CodegenError::MalformedSymbolName { symbol, reason } => {
                write!(f, "malformed symbol name '{symbol}': {reason}")
            }
            CodegenError::NameTooLong { len, limit } => {
                write!(f, "symbol name of {len} bytes exceeds the {limit} byte limit")
            }
            CodegenError::UnencodableTag(tag) => {
                write!(f, "type tag '{tag}' has no managed descriptor")
            }
            CodegenError::CodeGenFailed(message) => write!(f, "code generation failed: {message}"),
        }
    }
}

impl std::error::Error for CodegenError {}

pub type CodegenResult<T> = Result<T, CodegenError>;
