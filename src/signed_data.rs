use chrono::{DateTime, Utc};
use cms::{content_info::ContentInfo, signed_data::SignerIdentifier};
use der::{
    asn1::OctetString,
    oid::ObjectIdentifier,
    Any, Decode, SliceReader, Tag, Tagged,
};
use digest::{Digest, DynDigest};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    asn1::{self, parse_time, walk, Asn1Node, Asn1Value},
    cert::{Certificate, DistinguishedName},
    errors::{PdfSignError, PdfSignErrorKind, PdfSignResult},
    oids::{
        ID_MESSAGE_DIGEST, ID_SHA1, ID_SHA256, ID_SHA384, ID_SHA512, ID_SIGNED_DATA,
        ID_SIGNING_TIME,
    },
    utils::to_hex_str,
};

pub fn new_digest(oid: &ObjectIdentifier) -> Result<Box<dyn DynDigest>, PdfSignError> {
    match *oid {
        ID_SHA1 => Ok(sha1::Sha1::new().box_clone()),
        ID_SHA256 => Ok(sha2::Sha256::new().box_clone()),
        ID_SHA384 => Ok(sha2::Sha384::new().box_clone()),
        ID_SHA512 => Ok(sha2::Sha512::new().box_clone()),
        _ => Err(PdfSignError {
            kind: PdfSignErrorKind::UnsupportedAlgorithm,
            message: format!("digest: {}", oid),
        }),
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SignerInfo {
    pub issuer: Option<DistinguishedName>,
    /// Hex encoded.
    pub serial_number: Option<String>,
    pub digest_algorithm: String,
    pub signing_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub message_digest: Option<Vec<u8>>,
    #[serde(skip)]
    pub signature: Vec<u8>, // encryptedDigest
    #[serde(skip)]
    subject_key_identifier: Option<Vec<u8>>,
    #[serde(skip)]
    digest_oid: ObjectIdentifier,
}

fn attribute_time(value: &Any) -> Option<DateTime<Utc>> {
    let utc = match value.tag() {
        Tag::UtcTime => true,
        Tag::GeneralizedTime => false,
        _ => return None,
    };
    std::str::from_utf8(value.value())
        .ok()
        .and_then(|text| parse_time(text, utc))
}

impl TryFrom<&cms::signed_data::SignerInfo> for SignerInfo {
    type Error = PdfSignError;

    fn try_from(signer_info: &cms::signed_data::SignerInfo) -> Result<Self, Self::Error> {
        let (issuer, serial_number, subject_key_identifier) = match &signer_info.sid {
            SignerIdentifier::IssuerAndSerialNumber(sid) => (
                Some(DistinguishedName::from(sid.issuer.clone())),
                Some(to_hex_str(sid.serial_number.as_bytes())),
                None,
            ),
            SignerIdentifier::SubjectKeyIdentifier(skid) => {
                (None, None, Some(skid.0.as_bytes().to_vec()))
            }
        };

        let mut message_digest = None;
        let mut signing_time = None;
        if let Some(attrs) = &signer_info.signed_attrs {
            for attr in attrs.iter() {
                let value = match attr.values.get(0) {
                    Some(value) => value,
                    None => continue,
                };
                match attr.oid {
                    ID_MESSAGE_DIGEST => {
                        let digest = value
                            .decode_as::<OctetString>()
                            .map_app_err(PdfSignErrorKind::InvalidSignedData)?;
                        message_digest = Some(digest.as_bytes().to_vec());
                    }
                    ID_SIGNING_TIME => signing_time = attribute_time(value),
                    _ => {}
                }
            }
        }

        Ok(Self {
            issuer,
            serial_number,
            digest_algorithm: signer_info.digest_alg.oid.to_string(),
            signing_time,
            message_digest,
            signature: signer_info.signature.as_bytes().to_vec(),
            subject_key_identifier,
            digest_oid: signer_info.digest_alg.oid,
        })
    }
}

/// The CMS `SignedData` held in a signature's `/Contents`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SignedData {
    pub certificates: Vec<Certificate>,
    pub signer_info: SignerInfo,
}

impl SignedData {
    /// Decodes a DER `ContentInfo`. Trailing bytes, such as the zero padding
    /// of a PDF signature placeholder, are ignored.
    pub fn from_der(bytes: &[u8]) -> Result<Self, PdfSignError> {
        let mut reader = SliceReader::new(bytes).map_app_err(PdfSignErrorKind::InvalidSignedData)?;
        let ci = ContentInfo::decode(&mut reader).map_app_err(PdfSignErrorKind::InvalidSignedData)?;

        if ci.content_type != ID_SIGNED_DATA {
            return Err(PdfSignError {
                kind: PdfSignErrorKind::InvalidSignedData,
                message: format!("content type {}", ci.content_type),
            });
        }

        let signed_data = ci
            .content
            .decode_as::<cms::signed_data::SignedData>()
            .map_app_err(PdfSignErrorKind::InvalidSignedData)?;

        let signer_info: SignerInfo = signed_data
            .signer_infos
            .0
            .get(0)
            .ok_or(PdfSignError {
                kind: PdfSignErrorKind::InvalidSignedData,
                message: "no signer info".to_owned(),
            })?
            .try_into()?;

        let mut certificates: Vec<Certificate> = vec![];
        if let Some(certset) = &signed_data.certificates {
            for cert_choice in certset.0.iter() {
                match cert_choice {
                    cms::cert::CertificateChoices::Certificate(cert) => {
                        certificates.push(cert.to_owned().try_into()?)
                    }
                    cms::cert::CertificateChoices::Other(cert) => warn!(
                        format = %cert.other_cert_format,
                        "skipping unsupported certificate format"
                    ),
                }
            }
        }

        Ok(Self {
            certificates,
            signer_info,
        })
    }

    /// The certificate that produced the signature, if it is embedded.
    pub fn signer_certificate(self: &Self) -> Option<&Certificate> {
        let signer = &self.signer_info;

        self.certificates.iter().find(|cert| {
            match (&signer.issuer, &signer.serial_number, &signer.subject_key_identifier) {
                (Some(issuer), Some(serial), _) => {
                    cert.issuer == *issuer && to_hex_str(&cert.serial_number) == *serial
                }
                (_, _, Some(skid)) => cert.subject_key_identifier.as_ref() == Some(skid),
                _ => false,
            }
        })
    }

    /// Compares the signed `messageDigest` attribute with the digest of
    /// `parts`, the signed byte ranges in order.
    pub fn digest_matches(self: &Self, parts: &[&[u8]]) -> Result<bool, PdfSignError> {
        let expected = match &self.signer_info.message_digest {
            Some(expected) => expected,
            None => return Ok(false),
        };

        let mut hasher = new_digest(&self.signer_info.digest_oid)?;
        for part in parts {
            hasher.update(part);
        }

        Ok(hasher.finalize().to_vec() == *expected)
    }
}

/// Certificates found anywhere in a decoded tree.
///
/// Used when the blob is BER encoded or otherwise rejected by the DER
/// decoder, so that a chain can still be shown.
pub fn scan_certificates(nodes: &[Asn1Node]) -> Vec<Certificate> {
    let mut certs: Vec<Certificate> = vec![];

    for node in walk(nodes) {
        let shaped = match node.children() {
            [tbs, alg, sig] if node.is_sequence() => {
                tbs.is_sequence()
                    && alg.is_sequence()
                    && matches!(sig.value, Asn1Value::BitString { .. })
            }
            _ => false,
        };
        if !shaped || certs.iter().any(|c| c.raw == node.raw) {
            continue;
        }

        match Certificate::from_der(&node.raw) {
            Ok(cert) => certs.push(cert),
            Err(err) => debug!(%err, "skipping certificate-shaped node"),
        }
    }

    certs
}

/// Certificates of a CMS blob, through the DER decoder when possible.
pub fn certificates(cms: &[u8]) -> Vec<Certificate> {
    match SignedData::from_der(cms) {
        Ok(signed_data) => signed_data.certificates,
        Err(err) => {
            debug!(%err, "falling back to certificate scan");
            scan_certificates(&asn1::decode(cms).nodes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_by_oid() {
        let mut hasher = new_digest(&ID_SHA256).unwrap();
        hasher.update(b"abc");

        assert_eq!(
            to_hex_str(&hasher.finalize()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unknown_digest_oid() {
        let err = new_digest(&ObjectIdentifier::new_unwrap("1.3.36.3.2.1")).err().unwrap();
        assert_eq!(err.kind, PdfSignErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn not_signed_data() {
        // ContentInfo { id-data, [0] OCTET STRING }
        let bytes = b"\x30\x0f\x06\x09\x2a\x86\x48\x86\xf7\x0d\x01\x07\x01\xa0\x02\x04\x00";

        let err = SignedData::from_der(bytes).unwrap_err();
        assert_eq!(err.kind, PdfSignErrorKind::InvalidSignedData);
    }

    #[test]
    fn garbage_is_invalid() {
        let err = SignedData::from_der(b"\x00\x00\x00").unwrap_err();
        assert_eq!(err.kind, PdfSignErrorKind::InvalidSignedData);
        assert!(certificates(b"\x00\x00\x00").is_empty());
    }
}
