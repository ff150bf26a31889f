use thiserror::Error;

#[derive(Error, Debug)]
pub enum MdcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    InvalidChecksum { expected: u8, actual: u8 },

    #[error("Unexpected reply marker: {0:#04x}")]
    UnexpectedFrame(u8),

    #[error("Invalid acknowledgement byte: {0:#04x}")]
    InvalidAck(u8),

    #[error("Reply payload too short ({0} bytes)")]
    ShortPayload(usize),

    #[error("Payload of {0} bytes does not fit in a single frame")]
    PayloadTooLong(usize),

    #[error("Display rejected command {command:#04x} (error code {code:#04x})")]
    Rejected { command: u8, code: u8 },

    #[error("Unknown input source: {0}")]
    UnknownInputSource(String),
}
