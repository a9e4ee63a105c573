//! Detached PKCS#7 signatures for files that are not PDFs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use openssl::{
    nid::Nid,
    pkcs12::{ParsedPkcs12_2, Pkcs12},
    pkcs7::{Pkcs7, Pkcs7Flags},
    stack::Stack,
    x509::X509,
};
use tracing::info;

use crate::errors::{PdfSignError, PdfSignErrorKind, PdfSignResult};

fn open_keystore(pkcs12: &[u8], password: &str) -> Result<ParsedPkcs12_2, PdfSignError> {
    Pkcs12::from_der(pkcs12)
        .and_then(|p12| p12.parse2(password))
        .map_app_err(PdfSignErrorKind::Pkcs7Error)
}

/// Common name of the keystore's certificate.
pub fn common_name(pkcs12: &[u8], password: &str) -> Result<String, PdfSignError> {
    let parsed = open_keystore(pkcs12, password)?;

    parsed
        .cert
        .as_ref()
        .and_then(|cert| cert.subject_name().entries_by_nid(Nid::COMMONNAME).next())
        .and_then(|entry| entry.data().to_string().ok())
        .filter(|cn| !cn.trim().is_empty())
        .ok_or(PdfSignError::new(PdfSignErrorKind::MissingCommonName, ""))
}

/// Signs `data` with the key and certificate of a PKCS#12 keystore and
/// returns the DER encoded detached signature.
pub fn sign_detached(data: &[u8], pkcs12: &[u8], password: &str) -> Result<Vec<u8>, PdfSignError> {
    let parsed = open_keystore(pkcs12, password)?;

    let (cert, pkey) = match (parsed.cert, parsed.pkey) {
        (Some(cert), Some(pkey)) => (cert, pkey),
        _ => {
            return Err(PdfSignError::new(
                PdfSignErrorKind::Pkcs7Error,
                "keystore has no certificate or private key",
            ))
        }
    };

    let mut chain: Stack<X509> = Stack::new().map_unknown_err()?;
    for ca in parsed.ca.into_iter().flatten() {
        chain.push(ca).map_app_err(PdfSignErrorKind::Pkcs7Error)?;
    }

    Pkcs7::sign(&cert, &pkey, &chain, data, Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY)
        .and_then(|p7| p7.to_der())
        .map_app_err(PdfSignErrorKind::Pkcs7Error)
}

/// Writes `<file name>.p7s` next to `path` and returns its path. The
/// keystore certificate must carry a common name.
pub fn sign_file(path: &Path, pkcs12: &[u8], password: &str) -> Result<PathBuf, PdfSignError> {
    let signer = common_name(pkcs12, password)?;
    let data = fs::read(path).map_app_err(PdfSignErrorKind::IoError)?;
    let signature = sign_detached(&data, pkcs12, password)?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or(PdfSignError::new(PdfSignErrorKind::IoError, "not a file"))?;
    let target = path.with_file_name(format!("{}.p7s", name));

    fs::write(&target, signature).map_app_err(PdfSignErrorKind::IoError)?;
    info!(target = %target.display(), signer, "detached signature written");

    Ok(target)
}
