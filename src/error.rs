use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfForgeError {
    #[error("Corrupt document: {0}")]
    CorruptDocumentError(String),

    #[error("Invalid page range: {0}")]
    PageRangeError(String),

    #[error("Weak password: {0}")]
    WeakPasswordError(String),

    #[error("Password error: {0}")]
    PasswordError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormatError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Generates factory methods for [`PdfForgeError`] variants that wrap a `String`.
macro_rules! error_constructors {
    ($(
        $(#[doc = $doc:expr])*
        $method:ident => $variant:ident
    ),* $(,)?) => {
        impl PdfForgeError {
            $(
                $(#[doc = $doc])*
                pub fn $method(msg: impl Into<String>) -> Self {
                    Self::$variant(msg.into())
                }
            )*
        }
    };
}

error_constructors! {
    /// Create a corrupt document error.
    corrupt => CorruptDocumentError,
    /// Create a page range error.
    page_range => PageRangeError,
    /// Create a weak password error.
    weak_password => WeakPasswordError,
    /// Create a password (authentication) error.
    password => PasswordError,
    /// Create an unsupported format error.
    unsupported_format => UnsupportedFormatError,
    /// Create an encoding error.
    encoding => EncodingError,
    /// Create a configuration error.
    config => ConfigError,
}

impl PdfForgeError {
    /// Short machine-readable tag of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CorruptDocumentError(_) => "corrupt_document",
            Self::PageRangeError(_) => "page_range",
            Self::WeakPasswordError(_) => "weak_password",
            Self::PasswordError(_) => "password",
            Self::UnsupportedFormatError(_) => "unsupported_format",
            Self::EncodingError(_) => "encoding",
            Self::ConfigError(_) => "config",
            Self::IoError(_) => "io",
        }
    }

    /// メッセージの先頭に `prefix: ` を付ける（種別は保つ）。
    pub fn context(self, prefix: &str) -> Self {
        match self {
            Self::CorruptDocumentError(m) => Self::CorruptDocumentError(format!("{prefix}: {m}")),
            Self::PageRangeError(m) => Self::PageRangeError(format!("{prefix}: {m}")),
            Self::WeakPasswordError(m) => Self::WeakPasswordError(format!("{prefix}: {m}")),
            Self::PasswordError(m) => Self::PasswordError(format!("{prefix}: {m}")),
            Self::UnsupportedFormatError(m) => Self::UnsupportedFormatError(format!("{prefix}: {m}")),
            Self::EncodingError(m) => Self::EncodingError(format!("{prefix}: {m}")),
            Self::ConfigError(m) => Self::ConfigError(format!("{prefix}: {m}")),
            Self::IoError(e) => Self::IoError(std::io::Error::new(e.kind(), format!("{prefix}: {e}"))),
        }
    }
}

impl From<lopdf::Error> for PdfForgeError {
    fn from(e: lopdf::Error) -> Self {
        match e {
            lopdf::Error::InvalidPassword
            | lopdf::Error::Decryption(lopdf::encryption::DecryptionError::IncorrectPassword) => {
                Self::PasswordError(e.to_string())
            }
            lopdf::Error::UnsupportedSecurityHandler(_) => Self::UnsupportedFormatError(e.to_string()),
            _ => Self::EncodingError(e.to_string()),
        }
    }
}

impl From<serde_yml::Error> for PdfForgeError {
    fn from(e: serde_yml::Error) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<image::ImageError> for PdfForgeError {
    fn from(e: image::ImageError) -> Self {
        Self::EncodingError(e.to_string())
    }
}

impl From<zip::result::ZipError> for PdfForgeError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::EncodingError(format!("archive: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, PdfForgeError>;
