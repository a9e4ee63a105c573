//! Inspection of the signatures of a signed PDF.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    cert::{
        chain::{order_certificates, validate_chain, ChainValidation},
        Certificate,
    },
    errors::PdfSignError,
    pdf::{
        docmdp::{extract_docmdp_data, DocMdpData},
        extract_signatures, EmbeddedSignature,
    },
    signed_data::{self, SignedData, SignerInfo},
    tsa::{self, TimestampToken},
};

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SignatureReport {
    pub field_name: Option<String>,
    pub sub_filter: Option<String>,
    pub byte_range: [usize; 4],
    pub covers_whole_document: bool,
    pub signer: Option<SignerInfo>,
    /// Common name of the signing certificate.
    pub signer_name: Option<String>,
    /// Embedded certificates, leaf first when the chain could be ordered.
    pub certificates: Vec<Certificate>,
    pub chain: ChainValidation,
    /// Whether the signed ranges hash to the signed `messageDigest`. `None`
    /// for document timestamps and undecodable signatures.
    pub digest_valid: Option<bool>,
    pub signing_time: Option<DateTime<Utc>>,
    pub timestamp: Option<TimestampToken>,
    pub timestamp_imprint_valid: Option<bool>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VerificationReport {
    pub signatures: Vec<SignatureReport>,
    pub docmdp: DocMdpData,
}

fn ordered(certs: Vec<Certificate>) -> Vec<Certificate> {
    match order_certificates(certs.clone()) {
        Ok(ordered) => ordered,
        Err(err) => {
            debug!(%err, "keeping certificates in signature order");
            certs
        }
    }
}

/// Builds the report of one signature. Undecodable contents leave the CMS
/// derived fields empty.
pub fn inspect_signature(pdf: &[u8], signature: &EmbeddedSignature) -> SignatureReport {
    let contents = &signature.contents;
    let parts = signature.signed_parts(pdf);

    let signed_data = match SignedData::from_der(contents) {
        Ok(signed_data) => Some(signed_data),
        Err(err) => {
            warn!(field = ?signature.field_name, %err, "signature contents are not DER SignedData");
            None
        }
    };

    let certificates = ordered(match &signed_data {
        Some(signed_data) => signed_data.certificates.clone(),
        None => signed_data::certificates(contents),
    });

    let timestamp = tsa::extract(contents);

    let (digest_valid, imprint_data) = match &signed_data {
        _ if signature.is_timestamp() => (None, Some(parts.concat())),
        Some(signed_data) => (
            signed_data.digest_matches(&parts).ok(),
            Some(signed_data.signer_info.signature.clone()),
        ),
        None => (None, None),
    };

    let timestamp_imprint_valid = match (&timestamp, imprint_data) {
        (Some(token), Some(data)) => token.matches_imprint(&data).ok(),
        _ => None,
    };

    let signer_name = signed_data
        .as_ref()
        .and_then(|signed_data| signed_data.signer_certificate())
        .and_then(|cert| cert.common_name())
        .map(str::to_owned);

    let signing_time = signed_data
        .as_ref()
        .and_then(|signed_data| signed_data.signer_info.signing_time)
        .or_else(|| tsa::get_signing_time(contents));

    SignatureReport {
        field_name: signature.field_name.clone(),
        sub_filter: signature.sub_filter.clone(),
        byte_range: signature.byte_range,
        covers_whole_document: signature.covers_whole_document,
        signer: signed_data.map(|signed_data| signed_data.signer_info),
        signer_name,
        chain: validate_chain(&certificates),
        certificates,
        digest_valid,
        signing_time,
        timestamp,
        timestamp_imprint_valid,
    }
}

pub fn inspect(pdf: &[u8]) -> Result<VerificationReport, PdfSignError> {
    let signatures = extract_signatures(pdf)?
        .iter()
        .map(|signature| inspect_signature(pdf, signature))
        .collect();

    Ok(VerificationReport {
        signatures,
        docmdp: extract_docmdp_data(pdf)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{docmdp::DocMdpLevel, fixtures::PdfBuilder};

    #[test]
    fn undecodable_contents() {
        let pdf = PdfBuilder::approval_signed(b"\x30\x03\x02\x01\x01");

        let report = inspect(&pdf).unwrap();

        assert_eq!(report.signatures.len(), 1);
        let sig = &report.signatures[0];
        assert_eq!(sig.field_name.as_deref(), Some("Signature1"));
        assert_eq!(sig.signer, None);
        assert_eq!(sig.digest_valid, None);
        assert_eq!(sig.timestamp, None);
        assert!(sig.certificates.is_empty());
        assert!(!sig.chain.valid);
        assert_eq!(report.docmdp.docmdp.level, DocMdpLevel::NotCertified);
    }

    #[test]
    fn unsigned_document() {
        let report = inspect(&PdfBuilder::unsigned("1.4")).unwrap();
        assert!(report.signatures.is_empty());
    }

    #[cfg(feature = "openssl")]
    #[test]
    fn signed_ranges_match_digest() {
        use crate::{engine::pkcs7, utils::to_hex_str};

        let mut pdf = PdfBuilder::approval_signed(&[0u8; 2048]);
        let placeholder = extract_signatures(&pdf).unwrap().remove(0);

        let data = placeholder.signed_parts(&pdf).concat();
        let p12 = pkcs7::tests::keystore(Some("Alice"), "pw");
        let der = pkcs7::sign_detached(&data, &p12, "pw").unwrap();

        // hex digits start after '<'
        let hex = to_hex_str(&der);
        let start = placeholder.byte_range[1] + 1;
        pdf[start..start + hex.len()].copy_from_slice(hex.as_bytes());

        let report = inspect(&pdf).unwrap();
        let sig = &report.signatures[0];

        assert_eq!(sig.digest_valid, Some(true));
        assert_eq!(sig.signer_name.as_deref(), Some("Alice"));
        assert_eq!(sig.certificates.len(), 1);
        assert!(sig.chain.has_root);
        assert!(sig.signing_time.is_some());
        assert_eq!(sig.timestamp, None);
        assert_eq!(sig.timestamp_imprint_valid, None);
    }
}
