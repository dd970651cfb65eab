/// Errors raised while acquiring, decoding or reporting a BMS reading.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial port could not be opened (missing, busy or no permission).
    #[error("Cannot open serial port '{port}': {source}")]
    Connection {
        port: String,
        #[source]
        source: std::io::Error,
    },
    /// The operation requires an open serial channel.
    #[error("Not connected to BMS")]
    NotConnected,
    /// The device stayed silent until the read timeout elapsed.
    #[error("No data received from BMS")]
    EmptyResponse,
    /// The response line is not a JSON object.
    #[error("Invalid data received: {raw} ({reason})")]
    MalformedPayload { raw: String, reason: String },
    /// The report or its chart could not be assembled or written.
    #[error("Report composition failed: {0}")]
    Composition(String),
    /// An I/O error, typically from the serial port communication.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
