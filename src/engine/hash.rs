use std::{fmt, ops::Range, str::FromStr};

use der::oid::ObjectIdentifier;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use serde::Serialize;
use tracing::debug;

use crate::{
    errors::{PdfSignError, PdfSignErrorKind},
    oids::{ID_RIPEMD160, ID_SHA1, ID_SHA256, ID_SHA384, ID_SHA512},
};

lazy_static! {
    static ref HEADER_REGEX: Regex = Regex::new(r"%PDF-([0-9])\.([0-9])").unwrap();
}

/// Readers look for the header within the first kilobyte.
const HEADER_WINDOW: usize = 1024;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
    Ripemd160,
}

impl HashAlgorithm {
    pub fn name(self: &Self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
            Self::Ripemd160 => "RIPEMD160",
        }
    }

    pub fn oid(self: &Self) -> ObjectIdentifier {
        match self {
            Self::Sha1 => ID_SHA1,
            Self::Sha256 => ID_SHA256,
            Self::Sha384 => ID_SHA384,
            Self::Sha512 => ID_SHA512,
            Self::Ripemd160 => ID_RIPEMD160,
        }
    }

    /// Parses a configured value, falling back to SHA256 for anything
    /// unsupported.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            debug!(value, "unsupported hash algorithm, using SHA256");
            Self::default()
        })
    }
}

impl Serialize for HashAlgorithm {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = PdfSignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            "RIPEMD160" => Ok(Self::Ripemd160),
            _ => Err(PdfSignError::new(PdfSignErrorKind::UnsupportedAlgorithm, s)),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize)]
pub struct PdfVersion {
    pub major: u8,
    pub minor: u8,
}

impl PdfVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    fn locate(pdf: &[u8]) -> Result<(Range<usize>, Self), PdfSignError> {
        let window = &pdf[..pdf.len().min(HEADER_WINDOW)];
        let caps = HEADER_REGEX.captures(window).ok_or(PdfSignError::new(
            PdfSignErrorKind::InvalidPdfVersion,
            "no %PDF-x.y header",
        ))?;

        // 单个数字, 不会失败
        let digit = |i: usize| caps.get(i).map_or(0, |m| m.as_bytes()[0] - b'0');
        let range = caps.get(0).map_or(0..0, |m| m.range());

        Ok((range, Self::new(digit(1), digit(2))))
    }

    /// Reads the version from the `%PDF-x.y` header.
    pub fn from_header(pdf: &[u8]) -> Result<Self, PdfSignError> {
        Self::locate(pdf).map(|(_, version)| version)
    }
}

impl fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The hash algorithm a document of `version` is signed with.
pub fn select_hash_algorithm(version: PdfVersion, configured: HashAlgorithm) -> HashAlgorithm {
    let selected = if version < PdfVersion::new(1, 6) {
        HashAlgorithm::Sha1
    } else if version < PdfVersion::new(1, 7) {
        HashAlgorithm::Sha256
    } else if configured == HashAlgorithm::Sha1 {
        HashAlgorithm::Sha256
    } else {
        configured
    };

    debug!(%version, %configured, %selected, "hash algorithm selected");
    selected
}

/// Rewrites the header of documents the signer cannot handle, in place.
///
/// Versions below 1.2 become 1.3. Otherwise versions below 1.6 become 1.6
/// when `hash` is SHA256. Only the version digits change, so every offset
/// in the file stays valid. Returns the new version if the header changed.
pub fn normalize_pdf_version(
    pdf: &mut [u8],
    hash: HashAlgorithm,
) -> Result<Option<PdfVersion>, PdfSignError> {
    let (range, version) = PdfVersion::locate(pdf)?;

    let target = if version < PdfVersion::new(1, 2) {
        PdfVersion::new(1, 3)
    } else if version < PdfVersion::new(1, 6) && hash == HashAlgorithm::Sha256 {
        PdfVersion::new(1, 6)
    } else {
        return Ok(None);
    };

    let header = format!("%PDF-{}", target);
    pdf[range].copy_from_slice(header.as_bytes());
    debug!(from = %version, to = %target, "PDF version rewritten");

    Ok(Some(target))
}
