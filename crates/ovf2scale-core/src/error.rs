//! Error types for the ovf2scale core library.

use std::path::PathBuf;

/// The main error type for ovf2scale operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// The OVF document is not well-formed XML.
    #[error("OVF parse error: {message}")]
    OvfParse { message: String },

    /// A required element is absent from the OVF document.
    #[error("OVF element not found: {element}")]
    MissingElement { element: String },

    /// A required attribute is absent from an OVF element.
    #[error("OVF attribute '{attribute}' not found on <{element}>")]
    MissingAttribute { element: String, attribute: String },

    /// A disk cannot be placed in the output VM.
    #[error("Disk layout error: {message}")]
    DiskLayout { message: String },

    /// The external image converter failed.
    #[error("Converter error: {message}")]
    Converter { message: String },

    /// The output template is malformed or a placeholder has no value.
    #[error("Template error: {message}")]
    Template { message: String },
}

/// A specialized Result type for ovf2scale operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create an OVF parse error.
    pub fn ovf_parse(message: impl Into<String>) -> Self {
        Self::OvfParse {
            message: message.into(),
        }
    }

    /// Create a missing element error.
    pub fn missing_element(element: impl Into<String>) -> Self {
        Self::MissingElement {
            element: element.into(),
        }
    }

    /// Create a missing attribute error.
    pub fn missing_attribute(element: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            element: element.into(),
            attribute: attribute.into(),
        }
    }

    /// Create a disk layout error.
    pub fn disk_layout(message: impl Into<String>) -> Self {
        Self::DiskLayout {
            message: message.into(),
        }
    }

    /// Create a converter error.
    pub fn converter(message: impl Into<String>) -> Self {
        Self::Converter {
            message: message.into(),
        }
    }

    /// Create a template error.
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}
