use std::{fmt::Display, io::Read};

use chrono::{DateTime, Utc};
use der::{oid::AssociatedOid, Decode, Encode};
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use serde::Serialize;

use crate::{
    errors::{PdfSignError, PdfSignErrorKind, PdfSignResult},
    utils::{to_hex_str, IndentString},
};

use super::name::DistinguishedName;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Certificate {
    pub version: u8,
    #[serde(serialize_with = "serialize_hex")]
    pub serial_number: Vec<u8>,
    pub issuer: DistinguishedName,
    pub validity: Validity,
    pub subject: DistinguishedName,
    /// `/K=V/...` name derived from the subject.
    pub name: String,
    #[serde(skip)]
    pub subject_key_identifier: Option<Vec<u8>>,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Validity {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Validity {
    pub fn contains(self: &Self, instant: DateTime<Utc>) -> bool {
        self.not_before <= instant && instant <= self.not_after
    }
}

impl TryFrom<x509_cert::time::Validity> for Validity {
    type Error = PdfSignError;

    fn try_from(value: x509_cert::time::Validity) -> Result<Self, Self::Error> {
        let convert = |t: x509_cert::time::Time| {
            let d = t.to_unix_duration();
            DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()).ok_or(PdfSignError {
                kind: PdfSignErrorKind::InvalidCertificate,
                message: "validity out of range".to_owned(),
            })
        };

        Ok(Self {
            not_before: convert(value.not_before)?,
            not_after: convert(value.not_after)?,
        })
    }
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_hex_str(bytes))
}

impl Display for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Certificate:")?;
        writeln!(f, "{}", format!("Subject: {}", self.subject).indent(4))?;
        writeln!(f, "{}", format!("Issuer: {}", self.issuer).indent(4))?;
        writeln!(
            f,
            "{}",
            format!("Serial Number: {}", to_hex_str(&self.serial_number)).indent(4)
        )?;
        write!(
            f,
            "{}",
            format!(
                "Validity: {} - {}",
                self.validity.not_before, self.validity.not_after
            )
            .indent(4)
        )
    }
}

impl Certificate {
    pub fn from_der(bytes: &[u8]) -> Result<Self, PdfSignError> {
        x509_cert::Certificate::from_der(bytes)
            .map_app_err(PdfSignErrorKind::InvalidCertificate)?
            .try_into()
    }

    // 从 PEM 文件导入证书
    pub fn load_pem_chain(input: &str) -> Result<Vec<Self>, PdfSignError> {
        fn find_boundary<T>(haystack: &[T], needle: &[T]) -> Option<usize>
        where
            for<'a> &'a [T]: PartialEq,
        {
            haystack
                .windows(needle.len())
                .position(|window| window == needle)
        }

        let mut certs = Vec::new();
        let mut position: usize = 0;

        let start_boundary = &b"-----BEGIN CERTIFICATE-----"[..];
        let end_boundary = &b"-----END CERTIFICATE-----"[..];

        let input = input.trim_end().as_bytes();

        while position < input.len() {
            let rest = &input[position..];
            let start_pos = match find_boundary(rest, start_boundary) {
                Some(pos) => pos,
                // 只剩下空白或注释
                None if certs.is_empty() => {
                    return Err(PdfSignError {
                        kind: PdfSignErrorKind::InvalidPemCertificate,
                        message: "no certificate found".to_owned(),
                    })
                }
                None => break,
            };
            let end_pos = find_boundary(rest, end_boundary).ok_or(PdfSignError {
                kind: PdfSignErrorKind::InvalidPemCertificate,
                message: "unterminated certificate".to_owned(),
            })? + end_boundary.len();

            let cert_buf = &rest[start_pos..end_pos];

            // from_pem 会报 PEM Base64 error，PEM 库使用的默认的 64，并不是动态判断的
            let mut decoder = pem_rfc7468::Decoder::new_detect_wrap(cert_buf)
                .map_app_err(PdfSignErrorKind::InvalidPemCertificate)?;
            let mut buf = vec![];
            decoder
                .read_to_end(&mut buf)
                .map_app_err(PdfSignErrorKind::InvalidPemCertificate)?;

            certs.push(Self::from_der(&buf)?);

            position += end_pos;
        }

        Ok(certs)
    }

    // 是否是自签名证书
    pub fn is_selfsigned(self: &Self) -> bool {
        self.issuer == self.subject
    }

    pub fn common_name(self: &Self) -> Option<&str> {
        self.subject.common_name()
    }
}

impl TryFrom<x509_cert::Certificate> for Certificate {
    type Error = PdfSignError;

    fn try_from(value: x509_cert::Certificate) -> Result<Self, Self::Error> {
        let raw = value.to_der().map_app_err(PdfSignErrorKind::InvalidCertificate)?;
        let tbs = value.tbs_certificate;
        let version = tbs.version as u8;
        let serial_number = tbs.serial_number.as_bytes().to_vec();
        let issuer: DistinguishedName = tbs.issuer.into();
        let validity = tbs.validity.try_into()?;
        let subject: DistinguishedName = tbs.subject.into();

        if subject.is_empty() || issuer.is_empty() {
            return Err(PdfSignError {
                kind: PdfSignErrorKind::InvalidStructure,
                message: format!(
                    "certificate {} has no subject or issuer",
                    to_hex_str(&serial_number)
                ),
            });
        }
        let name = subject.to_slash_string();

        let subject_key_identifier = match tbs.extensions.as_ref().and_then(|exts| {
            exts.iter()
                .find(|ext| ext.extn_id == SubjectKeyIdentifier::OID)
        }) {
            Some(ext) => Some(
                SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes())
                    .map_app_err(PdfSignErrorKind::InvalidCertificate)?
                    .0
                    .as_bytes()
                    .to_vec(),
            ),
            None => None,
        };

        Ok(Self {
            version,
            serial_number,
            issuer,
            validity,
            subject,
            name,
            subject_key_identifier,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, time::Duration};

    use der::{asn1::BitString, oid::ObjectIdentifier};
    use x509_cert::{
        name::Name,
        serial_number::SerialNumber,
        spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
        TbsCertificate, Version,
    };

    use super::*;

    fn x509(subject: &str, issuer: &str) -> x509_cert::Certificate {
        let algorithm = AlgorithmIdentifierOwned {
            oid: ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11"),
            parameters: None,
        };
        let name = |s: &str| match s {
            "" => Name::default(),
            s => Name::from_str(s).unwrap(),
        };

        x509_cert::Certificate {
            tbs_certificate: TbsCertificate {
                version: Version::V3,
                serial_number: SerialNumber::new(&[0x2a]).unwrap(),
                signature: algorithm.clone(),
                issuer: name(issuer),
                validity: x509_cert::time::Validity::from_now(Duration::from_secs(3600)).unwrap(),
                subject: name(subject),
                subject_public_key_info: SubjectPublicKeyInfoOwned {
                    algorithm: algorithm.clone(),
                    subject_public_key: BitString::from_bytes(&[0]).unwrap(),
                },
                issuer_unique_id: None,
                subject_unique_id: None,
                extensions: None,
            },
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&[0]).unwrap(),
        }
    }

    #[test]
    fn names_are_read() {
        let cert = Certificate::try_from(x509("CN=Leaf,O=Test", "CN=Root")).unwrap();

        assert_eq!(cert.common_name(), Some("Leaf"));
        assert!(!cert.is_selfsigned());
        assert_eq!(cert.serial_number, vec![0x2a]);
    }

    #[test]
    fn subject_and_issuer_are_required() {
        for (subject, issuer) in [("", "CN=Root"), ("CN=Leaf", ""), ("", "")] {
            let err = Certificate::try_from(x509(subject, issuer)).unwrap_err();
            assert_eq!(err.kind, PdfSignErrorKind::InvalidStructure);
        }
    }
}
