//! Error types for 3MF codec operations
//!
//! All failure modes surface through a single [`Error`] enum. Errors are
//! raised eagerly at the layer that first observes them; nothing is applied
//! to the caller's state before a call completes.

use std::io;
use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing 3MF packages
#[derive(Error, Debug)]
pub enum Error {
    /// The byte buffer is not a readable ZIP container.
    ///
    /// A zero-entry archive is *not* this error; it opens as an empty
    /// package.
    #[error("not a 3MF archive: {0}")]
    NotAnArchive(String),

    /// A required part or relationship is absent from the package.
    ///
    /// Raised when the package relationships name no model root, cannot be
    /// parsed at all, or name a target that does not exist in the archive.
    #[error("missing required part: {0}")]
    MissingPart(String),

    /// The model XML is structurally or numerically invalid.
    ///
    /// Covers malformed markup, missing required attributes, and numeric
    /// text that does not parse. Malformed numbers never default silently.
    #[error("malformed model XML: {0}")]
    MalformedXml(String),

    /// A vertex index or object reference points outside the document.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The component reference graph contains a cycle through this object.
    #[error("component reference cycle through object {0}")]
    GraphCycle(u32),

    /// The document requires an extension this codec does not implement.
    #[error("required extension not supported: {0}")]
    UnsupportedExtension(String),

    /// I/O failure on the write path. Fatal and unrecoverable.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::MalformedXml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::MalformedXml(format!("attribute error: {}", err))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        // Read-path zip failures are mapped to NotAnArchive at the call
        // site; a conversion reaching here is a write-path failure.
        Error::Io(io::Error::other(err.to_string()))
    }
}

impl Error {
    /// MalformedXml for a required attribute that is absent
    pub fn missing_attribute(element: &str, attribute: &str) -> Self {
        Error::MalformedXml(format!(
            "element <{}> is missing required attribute '{}'",
            element, attribute
        ))
    }

    /// MalformedXml for numeric text that failed to parse
    pub fn bad_number(field: &str, value: &str) -> Self {
        Error::MalformedXml(format!(
            "field '{}' does not contain a valid number: '{}'",
            field, value
        ))
    }

    /// InvalidGeometry for a reference to an object id that does not exist
    pub fn dangling_reference(context: &str, id: u32) -> Self {
        Error::InvalidGeometry(format!(
            "{} references object {}, which does not exist",
            context, id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = Error::missing_attribute("vertex", "x");
        assert!(err.to_string().contains("<vertex>"));
        assert!(err.to_string().contains("'x'"));

        let err = Error::bad_number("vertex y coordinate", "abc");
        assert!(err.to_string().contains("vertex y coordinate"));
        assert!(err.to_string().contains("'abc'"));

        let err = Error::dangling_reference("build item", 42);
        assert!(err.to_string().contains("object 42"));
    }

    #[test]
    fn cycle_names_the_object() {
        assert_eq!(
            Error::GraphCycle(7).to_string(),
            "component reference cycle through object 7"
        );
    }
}
