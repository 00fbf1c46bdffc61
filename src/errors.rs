// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the lighting reconstruction service

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Keyframe protocol errors (message dropped, connection stays open)
    Protocol(ProtocolError),
    /// Anchor network cache errors
    AnchorCache(AnchorCacheError),
    /// GPU compute errors
    Gpu(String),
    /// Configuration errors
    Config(String),
    /// Environment map encoding errors
    Encoding(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Package kinds of the binary keyframe protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    SessionInit,
    NearFieldKeyframe,
    FarFieldKeyframe,
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageKind::SessionInit => write!(f, "session init"),
            PackageKind::NearFieldKeyframe => write!(f, "near field keyframe"),
            PackageKind::FarFieldKeyframe => write!(f, "far field keyframe"),
        }
    }
}

/// Keyframe protocol errors
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Message carried no bytes at all
    EmptyMessage,
    /// Leading byte does not name any known package
    UnknownIdentifier(u8),
    /// Leading byte does not match the package type being decoded
    IdentifierMismatch { expected: u8, found: u8 },
    /// Buffer length differs from the size derived from the session config
    MalformedPackage {
        kind: PackageKind,
        expected: usize,
        actual: usize,
    },
    /// Session-init fields describe an unusable session
    InvalidConfig(String),
    /// Keyframe received before any session-init
    UninitializedSession,
    /// Near-field view index outside `[0, views)`
    ViewIndexOutOfRange { index: i32, views: u32 },
}

/// Anchor network cache errors
#[derive(Debug, Clone)]
pub enum AnchorCacheError {
    /// Reading or writing the cache file failed
    Io(String),
    /// File does not start with the cache magic
    BadMagic,
    /// Cache metadata could not be parsed
    Metadata(String),
    /// Cache was written for a different network shape
    ShapeMismatch(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Protocol(e) => write!(f, "Protocol error: {}", e),
            AppError::AnchorCache(e) => write!(f, "Anchor cache error: {}", e),
            AppError::Gpu(msg) => write!(f, "GPU error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::EmptyMessage => write!(f, "Empty message"),
            ProtocolError::UnknownIdentifier(id) => {
                write!(f, "Unrecognized package identifier 0x{:02x}", id)
            }
            ProtocolError::IdentifierMismatch { expected, found } => write!(
                f,
                "Package identifier mismatch: expected 0x{:02x}, found 0x{:02x}",
                expected, found
            ),
            ProtocolError::MalformedPackage {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "Malformed {} package: expected {} bytes, got {}",
                kind, expected, actual
            ),
            ProtocolError::InvalidConfig(msg) => write!(f, "Invalid session config: {}", msg),
            ProtocolError::UninitializedSession => {
                write!(f, "Keyframe received before session init")
            }
            ProtocolError::ViewIndexOutOfRange { index, views } => write!(
                f,
                "View index {} out of range for {} configured views",
                index, views
            ),
        }
    }
}

impl fmt::Display for AnchorCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorCacheError::Io(msg) => write!(f, "I/O failed: {}", msg),
            AnchorCacheError::BadMagic => write!(f, "Not an anchor cache file"),
            AnchorCacheError::Metadata(msg) => write!(f, "Bad metadata: {}", msg),
            AnchorCacheError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for ProtocolError {}
impl std::error::Error for AnchorCacheError {}

impl From<ProtocolError> for AppError {
    fn from(err: ProtocolError) -> Self {
        AppError::Protocol(err)
    }
}

impl From<AnchorCacheError> for AppError {
    fn from(err: AnchorCacheError) -> Self {
        AppError::AnchorCache(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for AnchorCacheError {
    fn from(err: std::io::Error) -> Self {
        AnchorCacheError::Io(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Encoding(err.to_string())
    }
}
