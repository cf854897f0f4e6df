use miette::Diagnostic;
use thiserror::Error;

/// Failures of the GPIO driver layer.
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("GPIO driver unavailable: {0}")]
    Unavailable(String),
    #[error("pin {0} is not configured for this operation")]
    InvalidPin(u8),
    #[error("GPIO IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the payment backend.
///
/// The controller treats every variant the same way ("request failed"); the
/// distinction only matters for logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    #[diagnostic(code(config::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    #[diagnostic(
        code(config::parse),
        help("every section is optional; see `bill-acceptor check-config` for the defaults")
    )]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    #[diagnostic(code(config::invalid))]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("a transaction is already in flight")]
    AlreadyActive,
    #[error("invoice discovery failed: {0}")]
    Discovery(#[from] ClientError),
}

#[derive(Error, Debug)]
pub enum AcceptorError {
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("backend error: {0}")]
    Client(#[from] ClientError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("controller error: {0}")]
    Controller(#[from] ControllerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AcceptorError>;
