//! Error types for mesh operations
//!
//! None of these errors are fatal to the mesh. The dispatcher converts
//! them into log lines and statistics counters; frames that fail are
//! dropped and the node keeps running.

use thiserror::Error;

/// Main error type for mesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    // ===== Frame Errors =====
    /// Frame does not start with the `LoR` marker
    #[error("Invalid frame marker: expected 'LoR', got {got:02X?}")]
    InvalidMagic {
        /// The first bytes of the received frame
        got: Vec<u8>,
    },

    /// Frame is shorter than its fixed header
    #[error("Frame too short: {size} bytes, header needs {min}")]
    FrameTooShort {
        /// Received frame size
        size: usize,
        /// Minimum size for this frame type
        min: usize,
    },

    /// Frame exceeds the radio MTU
    #[error("Frame too large: {size} bytes exceeds radio maximum of {max} bytes")]
    FrameTooLarge {
        /// Frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Type byte is not a known frame type
    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),

    /// Map frame does not end with the end marker
    #[error("Map from {from:08X} is missing its end marker")]
    MissingEndMarker {
        /// Sender of the map
        from: u32,
    },

    /// Map node list is not a whole number of entries
    #[error("Map from {from:08X} has a node list of {len} bytes, not a multiple of 5")]
    MisSizedMap {
        /// Sender of the map
        from: u32,
        /// Length of the node list section
        len: usize,
    },

    /// Application payload does not fit a single frame
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    // ===== Queue and Routing Errors =====
    /// Inbound or outbound queue has no free slot
    #[error("{queue} queue is full ({capacity} entries)")]
    QueueFull {
        /// Queue name
        queue: &'static str,
        /// Queue capacity
        capacity: usize,
    },

    /// No route to the destination node
    #[error("No route to node {0:08X}")]
    NoRoute(u32),

    /// Radio driver refused the frame
    #[error("Radio rejected frame of {size} bytes")]
    RadioRejected {
        /// Size of the rejected frame
        size: usize,
    },

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Master node override cannot be used
    #[error("Invalid master node {0:08X}")]
    InvalidMasterNode(u32),

    // ===== General Errors =====
    /// Service channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MeshError {
    /// Check if this error means a received frame was corrupt or foreign
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            MeshError::InvalidMagic { .. }
                | MeshError::FrameTooShort { .. }
                | MeshError::FrameTooLarge { .. }
                | MeshError::UnknownFrameType(_)
                | MeshError::MissingEndMarker { .. }
                | MeshError::MisSizedMap { .. }
        )
    }

    /// Check if this error only means a frame was dropped
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            MeshError::QueueFull { .. } | MeshError::NoRoute(_) | MeshError::RadioRejected { .. }
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            MeshError::InvalidMagic { .. } => "INVALID_MAGIC",
            MeshError::FrameTooShort { .. } => "FRAME_TOO_SHORT",
            MeshError::FrameTooLarge { .. } => "FRAME_TOO_LARGE",
            MeshError::UnknownFrameType(_) => "UNKNOWN_FRAME_TYPE",
            MeshError::MissingEndMarker { .. } => "MISSING_END_MARKER",
            MeshError::MisSizedMap { .. } => "MIS_SIZED_MAP",
            MeshError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            MeshError::QueueFull { .. } => "QUEUE_FULL",
            MeshError::NoRoute(_) => "NO_ROUTE",
            MeshError::RadioRejected { .. } => "RADIO_REJECTED",
            MeshError::InvalidConfig(_) => "INVALID_CONFIG",
            MeshError::InvalidMasterNode(_) => "INVALID_MASTER_NODE",
            MeshError::ChannelClosed => "CHANNEL_CLOSED",
            MeshError::Io(_) => "IO_ERROR",
            MeshError::Json(_) => "JSON_ERROR",
        }
    }
}

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;

// Conversion from tokio mpsc send error
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MeshError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MeshError::ChannelClosed
    }
}
