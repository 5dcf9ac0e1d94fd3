//! Errors raised while framing or parsing the wire protocol.

use thiserror::Error;

/// Protocol-level failures. Any decode error is fatal to the connection;
/// an encode error is fatal only when it is `Io`.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The length field announces a frame above the configured maximum.
    #[error("frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },

    /// The length field is smaller than the fixed header of the layout.
    #[error("frame of {length} bytes is shorter than the {header}-byte header")]
    FrameTooShort { length: usize, header: usize },

    /// A packet of one layout was written on a link speaking another.
    #[error("cannot encode {found} packet on a {expected} link")]
    ProtocolMismatch {
        expected: crate::ProtocolType,
        found: crate::ProtocolType,
    },

    /// Underlying socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while building a [`crate::MessageIdTable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageIdError {
    #[error("message '{name}' uses reserved id {id}")]
    Reserved { name: String, id: i32 },

    #[error("message name '{0}' registered twice")]
    DuplicateName(String),

    #[error("message id {id} already registered as '{existing}'")]
    DuplicateId { id: i32, existing: String },
}
