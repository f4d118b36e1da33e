use thiserror::Error;

/// The error surface of the transform engine, aligned with the five kinds of failure
/// the driver distinguishes: a feature the engine does not implement, an XPath
/// evaluation failure, a failed fetch of an included/imported/`document()` resource,
/// malformed input discovered before evaluation starts, and an internal invariant
/// violation that indicates an engine bug rather than bad input.
///
/// Not every variant propagates all the way to the caller. `XPath` errors raised while
/// resolving an attribute value template are swallowed and the literal text is emitted
/// instead; `Fetch` errors are logged at debug level and the include/import/`document()`
/// call that triggered them is treated as producing nothing. See the driver's handling
/// in `driver.rs` for where each variant is caught versus surfaced.
#[derive(Error, Debug)]
pub enum XsltError {
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("XPath error: {0}")]
    XPath(#[from] xslt_xpath::XPathError),

    #[error("function '{function}' error: {message}")]
    Function { function: String, message: String },

    #[error("fetch error for '{url}': {message}")]
    Fetch { url: String, message: String },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("XML parsing error: {0}")]
    QuickXml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XsltError {
    pub fn not_implemented(what: impl Into<String>) -> Self {
        XsltError::NotImplemented(what.into())
    }

    pub fn malformed(what: impl Into<String>) -> Self {
        XsltError::MalformedInput(what.into())
    }

    pub fn invariant(what: impl Into<String>) -> Self {
        XsltError::InternalInvariant(what.into())
    }

    pub fn fetch(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        XsltError::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn function(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        XsltError::Function {
            function: name.into(),
            message: message.to_string(),
        }
    }
}

pub type XsltResult<T> = Result<T, XsltError>;
