//! `TSTInfo` decoding (RFC 3161 §2.4.2).
//!
//! ```text
//! TSTInfo ::= SEQUENCE {
//!     version        INTEGER { v1(1) },
//!     policy         TSAPolicyId,
//!     messageImprint MessageImprint,
//!     serialNumber   INTEGER,
//!     genTime        GeneralizedTime,
//!     accuracy       Accuracy                OPTIONAL,
//!     ordering       BOOLEAN DEFAULT FALSE,
//!     nonce          INTEGER                 OPTIONAL,
//!     tsa            [0] GeneralName         OPTIONAL,
//!     extensions     [1] IMPLICIT Extensions OPTIONAL }
//! ```
//!
//! Issuers disagree on how `tsa` and `extensions` are tagged, so four
//! layouts are tried in order before falling back to a linear scan.

use chrono::{DateTime, Utc};
use der::{
    asn1::{Int, OctetString},
    oid::ObjectIdentifier,
    Any, Decode, Enumerated, Sequence, Tag, Tagged,
};
use serde::Serialize;
use tracing::debug;
use x509_cert::{ext::Extensions, name::Name, spki::AlgorithmIdentifierOwned};

use crate::asn1::{self, parse_time, Asn1Node, Asn1Value};

#[derive(Clone, Debug, Copy, PartialEq, Eq, PartialOrd, Ord, Enumerated)]
#[asn1(type = "INTEGER")]
#[repr(u8)]
enum TstVersion {
    V1 = 1,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct MessageImprint {
    hash_algorithm: AlgorithmIdentifierOwned,
    hashed_message: OctetString,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Sequence)]
struct AccuracyField {
    #[asn1(optional = "true")]
    seconds: Option<u32>,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    millis: Option<u16>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    micros: Option<u16>,
}

/// Declared time deviation of `genTime`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Accuracy {
    pub seconds: Option<u32>,
    pub millis: Option<u16>,
    pub micros: Option<u16>,
}

impl From<AccuracyField> for Accuracy {
    fn from(value: AccuracyField) -> Self {
        Self {
            seconds: value.seconds,
            millis: value.millis,
            micros: value.micros,
        }
    }
}

/// TSTInfo fields recovered from a token. Every field is optional because
/// the permissive scan may only find some of them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TstFields {
    pub policy: Option<ObjectIdentifier>,
    pub hash_algorithm: Option<ObjectIdentifier>,
    pub hashed_message: Option<Vec<u8>>,
    pub serial_number: Option<Vec<u8>>,
    pub gen_time: Option<DateTime<Utc>>,
    pub accuracy: Option<Accuracy>,
    pub ordering: bool,
    pub nonce: Option<Vec<u8>>,
}

impl TstFields {
    pub fn is_empty(self: &Self) -> bool {
        self.gen_time.is_none()
            && self.policy.is_none()
            && self.serial_number.is_none()
            && self.hashed_message.is_none()
    }
}

fn gen_time(any: &Any) -> der::Result<DateTime<Utc>> {
    let utc = match any.tag() {
        Tag::GeneralizedTime => false,
        Tag::UtcTime => true,
        tag => return Err(tag.value_error()),
    };

    std::str::from_utf8(any.value())
        .ok()
        .and_then(|text| parse_time(text, utc))
        .ok_or_else(|| any.tag().value_error())
}

macro_rules! tst_info_layout {
    ($name:ident, $tsa:ty, $tsa_mode:tt, $ext_mode:tt) => {
        #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
        struct $name {
            version: TstVersion,
            policy: ObjectIdentifier,
            message_imprint: MessageImprint,
            serial_number: Int,
            // der's GeneralizedTime rejects fractional seconds
            gen_time: Any,
            #[asn1(optional = "true")]
            accuracy: Option<AccuracyField>,
            #[asn1(optional = "true")]
            ordering: Option<bool>,
            #[asn1(optional = "true")]
            nonce: Option<Int>,
            #[asn1(context_specific = "0", tag_mode = $tsa_mode, optional = "true")]
            tsa: Option<$tsa>,
            #[asn1(context_specific = "1", tag_mode = $ext_mode, optional = "true")]
            extensions: Option<Extensions>,
        }

        impl $name {
            fn decode_fields(bytes: &[u8]) -> der::Result<TstFields> {
                let info = Self::from_der(bytes)?;

                Ok(TstFields {
                    policy: Some(info.policy),
                    hash_algorithm: Some(info.message_imprint.hash_algorithm.oid),
                    hashed_message: Some(info.message_imprint.hashed_message.as_bytes().to_vec()),
                    serial_number: Some(info.serial_number.as_bytes().to_vec()),
                    gen_time: Some(gen_time(&info.gen_time)?),
                    accuracy: info.accuracy.map(Into::into),
                    ordering: info.ordering.unwrap_or(false),
                    nonce: info.nonce.map(|n| n.as_bytes().to_vec()),
                })
            }
        }
    };
}

tst_info_layout!(TstInfoExplicitImplicit, Any, "EXPLICIT", "IMPLICIT");
tst_info_layout!(TstInfoExplicitExplicit, Any, "EXPLICIT", "EXPLICIT");
tst_info_layout!(TstInfoImplicitImplicit, Name, "IMPLICIT", "IMPLICIT");
tst_info_layout!(TstInfoImplicitExplicit, Name, "IMPLICIT", "EXPLICIT");

type LayoutDecoder = fn(&[u8]) -> der::Result<TstFields>;

const LAYOUTS: [(&str, LayoutDecoder); 4] = [
    ("tsa explicit, extensions implicit", TstInfoExplicitImplicit::decode_fields),
    ("tsa explicit, extensions explicit", TstInfoExplicitExplicit::decode_fields),
    ("tsa implicit, extensions implicit", TstInfoImplicitImplicit::decode_fields),
    ("tsa implicit, extensions explicit", TstInfoImplicitExplicit::decode_fields),
];

/// Decodes DER `TSTInfo` bytes with the first layout that accepts them.
pub fn decode_structured(bytes: &[u8]) -> Option<TstFields> {
    for (layout, decoder) in LAYOUTS.iter() {
        match decoder(bytes) {
            Ok(fields) => {
                debug!(layout, "decoded TSTInfo");
                return Some(fields);
            }
            Err(err) => debug!(layout, %err, "TSTInfo layout rejected"),
        }
    }

    None
}

/// Decodes `TSTInfo` content, structured first, then by scanning.
pub fn decode(bytes: &[u8], nodes: &[Asn1Node]) -> TstFields {
    if let Some(fields) = decode_structured(bytes) {
        return fields;
    }

    debug!("falling back to a linear TSTInfo scan");
    if nodes.is_empty() {
        scan(&asn1::decode(bytes).nodes)
    } else {
        scan(nodes)
    }
}

/// Permissive field recovery for tokens the structured layouts reject
/// (BER encodings, unusual tagging).
pub fn scan(nodes: &[Asn1Node]) -> TstFields {
    let nodes: Vec<&Asn1Node> = asn1::walk(nodes).collect();
    let mut fields = TstFields::default();

    fields.policy = nodes.iter().find_map(|n| n.as_oid()).copied();

    let imprint = nodes.iter().enumerate().find_map(|(i, node)| {
        if !node.is_sequence() {
            return None;
        }
        let children = node.children();
        let hashed = children.iter().find_map(|c| c.as_octets())?;
        let algorithm = children.iter().find_map(|c| {
            c.as_oid()
                .or_else(|| c.children().first().and_then(|first| first.as_oid()))
        })?;
        Some((i, *algorithm, hashed.to_vec()))
    });

    let after = match imprint {
        Some((i, algorithm, hashed)) => {
            fields.hash_algorithm = Some(algorithm);
            fields.hashed_message = Some(hashed);
            i + 1
        }
        None => 0,
    };

    if fields.hashed_message.is_some() {
        fields.serial_number = nodes[after..]
            .iter()
            .find_map(|n| n.as_integer())
            .map(<[u8]>::to_vec);
    }

    fields.gen_time = nodes.iter().find_map(|n| n.as_time());
    fields.ordering = nodes
        .iter()
        .find_map(|n| match n.value {
            Asn1Value::Boolean(b) => Some(b),
            _ => None,
        })
        .unwrap_or(false);

    fields
}
