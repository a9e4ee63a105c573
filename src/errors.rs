use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PdfSignErrorKind {
    /// IO Error.
    IoError,

    /// Malformed ASN.1 (BER/DER) input.
    MalformedAsn1,

    /// Certificate record without subject, issuer or name.
    InvalidStructure,

    /// Empty certificate list.
    EmptyChain,

    /// Two certificates with the same name.
    DuplicateNames,

    /// Invalid Certificate.
    InvalidCertificate,

    /// Invalid PEM Certificate.
    InvalidPemCertificate,

    /// Invalid CMS SignedData.
    InvalidSignedData,

    /// Invalid PDF document.
    InvalidPdf,

    /// Missing or unparseable `%PDF-x.y` header.
    InvalidPdfVersion,

    /// Misconfiguration detected before running the signer.
    ConfigurationError,

    /// Temporary file, folder or image could not be created.
    ResourceError,

    /// Timestamp authority misconfiguration reported by the signer.
    TsaConfiguration,

    /// Hash algorithm not accepted for the document's PDF version.
    HashAlgorithmMismatch,

    /// Certificate without a common name.
    MissingCommonName,

    /// External signer failed.
    SigningFailed,

    /// PKCS7 detached signing error.
    Pkcs7Error,

    /// Unsupported Algorithm.
    UnsupportedAlgorithm,

    /// Unknown Error.
    Unknown,
}

impl PdfSignErrorKind {
    pub fn description(self: &Self) -> &'static str {
        match self {
            Self::IoError => "I/O error",
            Self::MalformedAsn1 => "malformed ASN.1 data",
            Self::InvalidStructure => "invalid certificate structure",
            Self::EmptyChain => "certificate chain is empty",
            Self::DuplicateNames => "certificate chain contains duplicate certificates",
            Self::InvalidCertificate => "invalid certificate",
            Self::InvalidPemCertificate => "invalid PEM certificate",
            Self::InvalidSignedData => "invalid PKCS#7 signed data",
            Self::InvalidPdf => "invalid PDF document",
            Self::InvalidPdfVersion => "unable to read the PDF version",
            Self::ConfigurationError => "signing is not configured correctly",
            Self::ResourceError => "unable to create a temporary resource",
            Self::TsaConfiguration => {
                "timestamp server is unreachable or misconfigured, check the TSA URL and credentials"
            }
            Self::HashAlgorithmMismatch => {
                "the selected hash algorithm is not supported by this PDF version"
            }
            Self::MissingCommonName => "the certificate has no common name (CN)",
            Self::SigningFailed => "signing failed",
            Self::Pkcs7Error => "PKCS#7 signing failed",
            Self::UnsupportedAlgorithm => "unsupported algorithm",
            Self::Unknown => "unknown error",
        }
    }
}

#[derive(Debug)]
pub struct PdfSignError {
    pub kind: PdfSignErrorKind,
    pub message: String,
}

impl PdfSignError {
    pub fn new(kind: PdfSignErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for PdfSignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind.description())
        } else {
            write!(f, "{}: {}", self.kind.description(), self.message)
        }
    }
}

impl std::error::Error for PdfSignError {}

pub type Result<T> = std::result::Result<T, PdfSignError>;

pub trait PdfSignResult<T> {
    fn map_app_err(self: Self, kind: PdfSignErrorKind) -> Result<T>;
    fn map_unknown_err(self: Self) -> Result<T>;
}

impl<T, E> PdfSignResult<T> for std::result::Result<T, E>
where
    E: std::error::Error + 'static,
{
    fn map_app_err(self: Self, kind: PdfSignErrorKind) -> Result<T> {
        self.map_err(|err| PdfSignError {
            kind: kind,
            message: err.to_string(),
        })
    }

    fn map_unknown_err(self: Self) -> Result<T> {
        self.map_app_err(PdfSignErrorKind::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_detail() {
        let err = PdfSignError::new(PdfSignErrorKind::DuplicateNames, "/CN=Root");
        assert_eq!(
            err.to_string(),
            "certificate chain contains duplicate certificates: /CN=Root"
        );
    }

    #[test]
    fn display_without_detail() {
        let err = PdfSignError::new(PdfSignErrorKind::EmptyChain, "");
        assert_eq!(err.to_string(), "certificate chain is empty");
    }

    #[test]
    fn map_app_err_keeps_source_message() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing.pdf",
        ));
        let err = res.map_app_err(PdfSignErrorKind::IoError).unwrap_err();
        assert_eq!(err.kind, PdfSignErrorKind::IoError);
        assert_eq!(err.message, "missing.pdf");
    }
}
