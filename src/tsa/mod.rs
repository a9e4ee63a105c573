//! RFC 3161 timestamp tokens embedded in CMS signatures.
//!
//! The token normally sits in the `id-aa-timeStampToken` unsigned attribute
//! of the signer; document timestamps (`ETSI.RFC3161`) carry it as the whole
//! `/Contents`. Both shapes are handled by [`extract`].

pub mod tstinfo;

use chrono::{DateTime, Utc};
use der::oid::ObjectIdentifier;
use digest::Digest;
use serde::Serialize;
use tracing::debug;

use crate::{
    asn1::{self, node_after_oid, walk, Asn1Node},
    cert::{Certificate, DistinguishedName, RdnValue},
    errors::{PdfSignError, PdfSignErrorKind},
    oids::{
        rdn_short_name, ID_AA_TIME_STAMP_TOKEN, ID_CT_TST_INFO, ID_SHA1, ID_SHA256, ID_SHA384,
        ID_SHA512, ID_SIGNING_TIME, TSA_HINT_ATTRIBUTES,
    },
    signed_data::scan_certificates,
    utils::to_hex_str,
};

pub use tstinfo::{Accuracy, TstFields};

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TimestampToken {
    pub gen_time: DateTime<Utc>,
    pub policy: Option<String>,
    /// Hex encoded.
    pub serial_number: Option<String>,
    pub hash_algorithm: Option<String>,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub hashed_message: Option<Vec<u8>>,
    pub accuracy: Option<Accuracy>,
    pub ordering: bool,
    /// Hex encoded.
    pub nonce: Option<String>,
    /// Name attributes found in the token, usable even when the TSA
    /// certificate itself cannot be decoded.
    pub tsa_name: DistinguishedName,
    /// Certificates carried in the token, unordered.
    pub certificates: Vec<Certificate>,
}

fn serialize_opt_hex<S: serde::Serializer>(
    bytes: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serializer.serialize_some(&to_hex_str(bytes)),
        None => serializer.serialize_none(),
    }
}

impl TimestampToken {
    fn new(
        fields: TstFields,
        tsa_name: DistinguishedName,
        certificates: Vec<Certificate>,
    ) -> Option<Self> {
        Some(Self {
            gen_time: fields.gen_time?,
            policy: fields.policy.map(|oid| oid.to_string()),
            serial_number: fields.serial_number.map(|sn| to_hex_str(&sn)),
            hash_algorithm: fields.hash_algorithm.map(|oid| oid.to_string()),
            hashed_message: fields.hashed_message,
            accuracy: fields.accuracy,
            ordering: fields.ordering,
            nonce: fields.nonce.map(|n| to_hex_str(&n)),
            tsa_name,
            certificates,
        })
    }

    /// Checks the message imprint against `data`, the bytes the token was
    /// requested for (the signer's signature value for a signature timestamp).
    pub fn matches_imprint(self: &Self, data: &[u8]) -> Result<bool, PdfSignError> {
        let hashed = match &self.hashed_message {
            Some(hashed) => hashed,
            None => return Ok(false),
        };
        let algorithm = self.hash_algorithm.as_deref().unwrap_or_default();

        let digest = match ObjectIdentifier::new(algorithm) {
            Ok(ID_SHA1) => sha1::Sha1::digest(data).to_vec(),
            Ok(ID_SHA256) => sha2::Sha256::digest(data).to_vec(),
            Ok(ID_SHA384) => sha2::Sha384::digest(data).to_vec(),
            Ok(ID_SHA512) => sha2::Sha512::digest(data).to_vec(),
            _ => {
                return Err(PdfSignError {
                    kind: PdfSignErrorKind::UnsupportedAlgorithm,
                    message: algorithm.to_owned(),
                })
            }
        };

        Ok(&digest == hashed)
    }
}

/// Extracts the timestamp token from a CMS blob.
///
/// `None` means there is no usable token (no `genTime` could be found). A
/// truncated blob still yields whatever the decoder recovered.
pub fn extract(cms: &[u8]) -> Option<TimestampToken> {
    let decoded = asn1::decode(cms);
    if let Some(err) = &decoded.error {
        debug!(%err, "CMS blob decoded partially");
    }

    // SET { ContentInfo } of the unsigned attribute, or the blob itself
    let scope: &[Asn1Node] = match node_after_oid(&decoded.nodes, &ID_AA_TIME_STAMP_TOKEN) {
        Some(values) => values.children(),
        None => {
            debug!("no timestamp token attribute, scanning for TSTInfo");
            &decoded.nodes
        }
    };

    let content = tst_info_content(scope)?;
    let fields = tstinfo::decode(content.as_octets()?, content.children());
    if fields.is_empty() {
        return None;
    }

    let tsa_name = match name_hints(content.children()) {
        hints if !hints.is_empty() => hints,
        _ => name_hints(scope),
    };

    TimestampToken::new(fields, tsa_name, scan_certificates(scope))
}

fn tst_info_content(scope: &[Asn1Node]) -> Option<&Asn1Node> {
    let mut iter = walk(scope);
    iter.find(|node| node.as_oid() == Some(&ID_CT_TST_INFO))?;
    iter.find(|node| node.as_octets().is_some())
}

fn name_hints(nodes: &[Asn1Node]) -> DistinguishedName {
    let mut hints = DistinguishedName::default();
    let mut iter = walk(nodes).peekable();

    while let Some(node) = iter.next() {
        let key = match node.as_oid().and_then(rdn_short_name) {
            Some(key) if TSA_HINT_ATTRIBUTES.contains(&key) => key,
            _ => continue,
        };
        if hints.get(key).is_some() {
            continue;
        }
        if let Some(value) = iter.peek().and_then(|next| next.as_str()) {
            hints.0.push((key.to_owned(), RdnValue::Single(value.to_owned())));
        }
    }

    hints
}

/// Returns the `id-signingTime` signed attribute of a CMS blob.
pub fn get_signing_time(cms: &[u8]) -> Option<DateTime<Utc>> {
    let decoded = asn1::decode(cms);

    node_after_oid(&decoded.nodes, &ID_SIGNING_TIME)?
        .children()
        .iter()
        .find_map(Asn1Node::as_time)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        let len = content.len();
        if len < 0x80 {
            out.push(len as u8);
        } else if len < 0x100 {
            out.extend_from_slice(&[0x81, len as u8]);
        } else {
            out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
        }
        out.extend_from_slice(content);
        out
    }

    fn cat(parts: &[Vec<u8>]) -> Vec<u8> {
        parts.concat()
    }

    fn oid(dotted: &str) -> Vec<u8> {
        tlv(
            0x06,
            der::oid::ObjectIdentifier::new_unwrap(dotted).as_bytes(),
        )
    }

    fn cn_name(cn: &str) -> Vec<u8> {
        let atv = tlv(0x30, &cat(&[oid("2.5.4.3"), tlv(0x0c, cn.as_bytes())]));
        tlv(0x30, &tlv(0x31, &atv))
    }

    fn tst_info(data: &[u8]) -> Vec<u8> {
        let hashed = sha2::Sha256::digest(data);
        tlv(
            0x30,
            &cat(&[
                tlv(0x02, &[0x01]),
                oid("1.3.6.1.4.1.601.10.3.1"),
                tlv(
                    0x30,
                    &cat(&[
                        tlv(0x30, &cat(&[oid("2.16.840.1.101.3.4.2.1"), vec![0x05, 0x00]])),
                        tlv(0x04, &hashed),
                    ]),
                ),
                tlv(0x02, &[0x30, 0x39]),
                tlv(0x18, b"20240315101112Z"),
                tlv(0xa0, &tlv(0xa4, &cn_name("Test TSA"))),
            ]),
        )
    }

    fn token(data: &[u8]) -> Vec<u8> {
        let encap = tlv(
            0x30,
            &cat(&[
                oid("1.2.840.113549.1.9.16.1.4"),
                tlv(0xa0, &tlv(0x04, &tst_info(data))),
            ]),
        );
        let signed_data = tlv(
            0x30,
            &cat(&[tlv(0x02, &[0x03]), tlv(0x31, &[]), encap, tlv(0x31, &[])]),
        );
        tlv(
            0x30,
            &cat(&[oid("1.2.840.113549.1.7.2"), tlv(0xa0, &signed_data)]),
        )
    }

    fn signature_with_token(data: &[u8]) -> Vec<u8> {
        let signing_time = tlv(
            0x30,
            &cat(&[
                oid("1.2.840.113549.1.9.5"),
                tlv(0x31, &tlv(0x17, b"240315101100Z")),
            ]),
        );
        let token_attr = tlv(
            0x30,
            &cat(&[
                oid("1.2.840.113549.1.9.16.2.14"),
                tlv(0x31, &token(data)),
            ]),
        );
        let signer_info = tlv(
            0x30,
            &cat(&[
                tlv(0x02, &[0x01]),
                tlv(0xa0, &signing_time),
                tlv(0x04, data),
                tlv(0xa1, &token_attr),
            ]),
        );
        tlv(
            0x30,
            &cat(&[oid("1.2.840.113549.1.7.2"), tlv(0xa0, &tlv(0x31, &signer_info))]),
        )
    }

    #[test]
    fn extract_from_unsigned_attribute() {
        let cms = signature_with_token(b"signature value");

        let token = extract(&cms).unwrap();

        assert_eq!(
            token.gen_time,
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 11, 12).unwrap()
        );
        assert_eq!(token.policy.as_deref(), Some("1.3.6.1.4.1.601.10.3.1"));
        assert_eq!(token.serial_number.as_deref(), Some("3039"));
        assert_eq!(token.hash_algorithm.as_deref(), Some("2.16.840.1.101.3.4.2.1"));
        assert_eq!(token.tsa_name.common_name(), Some("Test TSA"));
        assert!(token.certificates.is_empty());
        assert!(token.matches_imprint(b"signature value").unwrap());
        assert!(!token.matches_imprint(b"something else").unwrap());
    }

    #[test]
    fn extract_from_bare_token() {
        let token = extract(&token(b"doc")).unwrap();

        assert_eq!(token.serial_number.as_deref(), Some("3039"));
    }

    #[test]
    fn signing_time_attribute() {
        let cms = signature_with_token(b"x");

        assert_eq!(
            get_signing_time(&cms),
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 10, 11, 0).unwrap())
        );
    }

    #[test]
    fn no_token_is_none() {
        let cms = tlv(
            0x30,
            &cat(&[oid("1.2.840.113549.1.7.2"), tlv(0xa0, &tlv(0x30, &[]))]),
        );

        assert_eq!(extract(&cms), None);
        assert_eq!(get_signing_time(&cms), None);
    }

    #[test]
    fn token_without_fields_is_none() {
        let encap = tlv(
            0x30,
            &cat(&[
                oid("1.2.840.113549.1.9.16.1.4"),
                tlv(0xa0, &tlv(0x04, &tlv(0x30, &tlv(0x01, &[0xff])))),
            ]),
        );

        assert_eq!(extract(&encap), None);
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(extract(b"\x30\x82\xff\xff\x02"), None);
        assert_eq!(extract(b""), None);
    }
}
