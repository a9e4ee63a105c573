//! Generic BER/DER reader.
//!
//! [`decode`] turns an untrusted byte buffer into a tree of [`Asn1Node`]. Both
//! definite and indefinite lengths are accepted, constructed OCTET STRINGs are
//! flattened, and OCTET STRINGs whose content is itself a well-formed SEQUENCE
//! or SET are decoded in place so that [`walk`] reaches encapsulated content
//! (for example the `TSTInfo` inside a timestamp token) without re-decoding.
//!
//! Decoding never panics. On malformed input the nodes recovered so far are
//! returned together with a [`PdfSignErrorKind::MalformedAsn1`] error.

use std::ops::Range;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use der::oid::ObjectIdentifier;

use crate::errors::{PdfSignError, PdfSignErrorKind, Result};

const MAX_DEPTH: usize = 64;

pub mod tag {
    pub const BOOLEAN: u32 = 1;
    pub const INTEGER: u32 = 2;
    pub const BIT_STRING: u32 = 3;
    pub const OCTET_STRING: u32 = 4;
    pub const NULL: u32 = 5;
    pub const OBJECT_IDENTIFIER: u32 = 6;
    pub const ENUMERATED: u32 = 10;
    pub const UTF8_STRING: u32 = 12;
    pub const SEQUENCE: u32 = 16;
    pub const SET: u32 = 17;
    pub const NUMERIC_STRING: u32 = 18;
    pub const PRINTABLE_STRING: u32 = 19;
    pub const TELETEX_STRING: u32 = 20;
    pub const IA5_STRING: u32 = 22;
    pub const UTC_TIME: u32 = 23;
    pub const GENERALIZED_TIME: u32 = 24;
    pub const VISIBLE_STRING: u32 = 26;
    pub const UNIVERSAL_STRING: u32 = 28;
    pub const BMP_STRING: u32 = 30;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TagClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Asn1Tag {
    pub class: TagClass,
    pub constructed: bool,
    pub number: u32,
}

impl Asn1Tag {
    pub fn is_universal(self: &Self, number: u32) -> bool {
        self.class == TagClass::Universal && self.number == number
    }

    pub fn is_context(self: &Self, number: u32) -> bool {
        self.class == TagClass::ContextSpecific && self.number == number
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StringKind {
    Utf8,
    Numeric,
    Printable,
    Teletex,
    Ia5,
    Visible,
    Universal,
    Bmp,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Asn1Value {
    Boolean(bool),
    /// Big-endian two's complement content, as encoded.
    Integer(Vec<u8>),
    BitString {
        unused_bits: u8,
        bytes: Vec<u8>,
    },
    /// `encapsulated` holds the decoded content when the octets are themselves
    /// a single well-formed SEQUENCE or SET.
    OctetString {
        bytes: Vec<u8>,
        encapsulated: Vec<Asn1Node>,
    },
    Null,
    ObjectIdentifier(ObjectIdentifier),
    String(StringKind, String),
    UtcTime(DateTime<Utc>),
    GeneralizedTime(DateTime<Utc>),
    Sequence(Vec<Asn1Node>),
    Set(Vec<Asn1Node>),
    /// Constructed application, context-specific or private value.
    Tagged(Vec<Asn1Node>),
    /// Primitive value this reader does not interpret.
    Any(Vec<u8>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Asn1Node {
    pub tag: Asn1Tag,
    pub value: Asn1Value,
    /// Complete encoding of the node, header included.
    pub raw: Vec<u8>,
    content: Range<usize>,
}

impl Asn1Node {
    pub fn children(self: &Self) -> &[Asn1Node] {
        match &self.value {
            Asn1Value::Sequence(children)
            | Asn1Value::Set(children)
            | Asn1Value::Tagged(children) => children,
            Asn1Value::OctetString { encapsulated, .. } => encapsulated,
            _ => &[],
        }
    }

    /// Content octets, without tag, length and end-of-contents marker.
    pub fn content(self: &Self) -> &[u8] {
        &self.raw[self.content.clone()]
    }

    pub fn walk(self: &Self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    pub fn as_oid(self: &Self) -> Option<&ObjectIdentifier> {
        match &self.value {
            Asn1Value::ObjectIdentifier(oid) => Some(oid),
            _ => None,
        }
    }

    pub fn as_octets(self: &Self) -> Option<&[u8]> {
        match &self.value {
            Asn1Value::OctetString { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub fn as_integer(self: &Self) -> Option<&[u8]> {
        match &self.value {
            Asn1Value::Integer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(self: &Self) -> Option<&str> {
        match &self.value {
            Asn1Value::String(_, s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(self: &Self) -> Option<DateTime<Utc>> {
        match &self.value {
            Asn1Value::UtcTime(t) | Asn1Value::GeneralizedTime(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_bool(self: &Self) -> Option<bool> {
        match &self.value {
            Asn1Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_sequence(self: &Self) -> bool {
        matches!(self.value, Asn1Value::Sequence(_))
    }

    pub fn is_set(self: &Self) -> bool {
        matches!(self.value, Asn1Value::Set(_))
    }
}

/// Iterative depth-first traversal in document order.
pub struct Walk<'a> {
    stack: Vec<&'a Asn1Node>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Asn1Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}

pub fn walk(nodes: &[Asn1Node]) -> Walk<'_> {
    Walk {
        stack: nodes.iter().rev().collect(),
    }
}

/// Returns the node that follows the first occurrence of `oid` in walk order.
///
/// For an `Attribute ::= SEQUENCE { type OID, values SET }` this is the values SET.
pub fn node_after_oid<'a>(nodes: &'a [Asn1Node], oid: &ObjectIdentifier) -> Option<&'a Asn1Node> {
    let mut iter = walk(nodes);
    iter.find(|node| node.as_oid() == Some(oid))?;
    iter.next()
}

/// Result of [`decode`]: every node recovered, plus the first error hit.
#[derive(Debug)]
pub struct Decoded {
    pub nodes: Vec<Asn1Node>,
    pub error: Option<PdfSignError>,
}

impl Decoded {
    pub fn is_complete(self: &Self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self: Self) -> Result<Vec<Asn1Node>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.nodes),
        }
    }
}

pub fn decode(bytes: &[u8]) -> Decoded {
    let mut decoder = Decoder {
        input: bytes,
        error: None,
    };
    let (nodes, _) = decoder.items(0, bytes.len(), false, 0);

    Decoded {
        nodes,
        error: decoder.error,
    }
}

struct Header {
    tag: Asn1Tag,
    content_start: usize,
    length: Option<usize>,
}

struct Decoder<'a> {
    input: &'a [u8],
    error: Option<PdfSignError>,
}

impl<'a> Decoder<'a> {
    fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(PdfSignError::new(PdfSignErrorKind::MalformedAsn1, message));
        }
    }

    /// Decodes consecutive items from `pos` up to `limit`. An `indefinite`
    /// run stops after its end-of-contents marker, which must lie before
    /// `limit`.
    fn items(
        &mut self,
        mut pos: usize,
        limit: usize,
        indefinite: bool,
        depth: usize,
    ) -> (Vec<Asn1Node>, usize) {
        let mut nodes = Vec::new();

        while self.error.is_none() {
            if pos >= limit {
                if indefinite {
                    self.fail("missing end-of-contents marker");
                }
                break;
            }
            if indefinite && self.input[pos..limit].starts_with(&[0, 0]) {
                pos += 2;
                break;
            }
            // signature placeholders are zero padded
            if depth == 0 && self.input[pos..limit].iter().all(|b| *b == 0) {
                pos = limit;
                break;
            }

            match self.node(pos, limit, depth) {
                Some((node, next)) => {
                    nodes.push(node);
                    pos = next;
                }
                None => break,
            }
        }

        (nodes, pos)
    }

    fn byte(&mut self, pos: usize, limit: usize, what: &str) -> Option<u8> {
        if pos < limit {
            Some(self.input[pos])
        } else {
            self.fail(format!("truncated {} at offset {}", what, pos));
            None
        }
    }

    fn header(&mut self, start: usize, limit: usize) -> Option<Header> {
        let first = self.byte(start, limit, "tag")?;
        let class = match first >> 6 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        };
        let constructed = first & 0x20 != 0;
        let mut number = (first & 0x1f) as u32;
        let mut pos = start + 1;

        if number == 0x1f {
            number = 0;
            loop {
                let b = self.byte(pos, limit, "tag number")?;
                pos += 1;
                if number > (u32::MAX >> 7) {
                    self.fail(format!("tag number overflow at offset {}", start));
                    return None;
                }
                number = (number << 7) | (b & 0x7f) as u32;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }

        let lb = self.byte(pos, limit, "length")?;
        pos += 1;
        let length = if lb & 0x80 == 0 {
            Some(lb as usize)
        } else if lb == 0x80 {
            None
        } else {
            let n = (lb & 0x7f) as usize;
            if n > 4 {
                self.fail(format!("unsupported length of {} octets at offset {}", n, start));
                return None;
            }
            if n > limit - pos {
                self.fail(format!("truncated length at offset {}", start));
                return None;
            }
            let len = self.input[pos..pos + n]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            pos += n;
            Some(len)
        };

        if let Some(len) = length {
            if len > limit - pos {
                self.fail(format!(
                    "length {} at offset {} exceeds the remaining {} bytes",
                    len,
                    start,
                    limit - pos
                ));
                return None;
            }
        }

        Some(Header {
            tag: Asn1Tag {
                class,
                constructed,
                number,
            },
            content_start: pos,
            length,
        })
    }

    fn node(&mut self, start: usize, limit: usize, depth: usize) -> Option<(Asn1Node, usize)> {
        if depth > MAX_DEPTH {
            self.fail(format!("nesting deeper than {} levels", MAX_DEPTH));
            return None;
        }

        let input = self.input;
        let Header {
            tag,
            content_start,
            length,
        } = self.header(start, limit)?;

        let (children, content_end, end) = match (length, tag.constructed) {
            (Some(len), false) => {
                let end = content_start + len;
                let value = self.primitive(tag, &input[content_start..end], depth)?;
                let node = Asn1Node {
                    tag,
                    value,
                    raw: input[start..end].to_vec(),
                    content: (content_start - start)..(end - start),
                };
                return Some((node, end));
            }
            (None, false) => {
                self.fail(format!("indefinite length on primitive value at offset {}", start));
                return None;
            }
            (Some(len), true) => {
                let end = content_start + len;
                let (children, _) = self.items(content_start, end, false, depth + 1);
                (children, end, end)
            }
            (None, true) => {
                let (children, end) = self.items(content_start, limit, true, depth + 1);
                let content_end = if self.error.is_none() { end - 2 } else { end };
                (children, content_end, end)
            }
        };

        let value = self.constructed(tag, children, depth);
        let node = Asn1Node {
            tag,
            value,
            raw: input[start..end].to_vec(),
            content: (content_start - start)..(content_end - start),
        };

        Some((node, end))
    }

    fn constructed(&mut self, tag: Asn1Tag, children: Vec<Asn1Node>, depth: usize) -> Asn1Value {
        if tag.class != TagClass::Universal {
            return Asn1Value::Tagged(children);
        }

        match tag.number {
            tag::SEQUENCE => Asn1Value::Sequence(children),
            tag::SET => Asn1Value::Set(children),
            tag::OCTET_STRING => {
                let bytes = flatten_segments(&children);
                let encapsulated = encapsulated(&bytes, depth);
                Asn1Value::OctetString {
                    bytes,
                    encapsulated,
                }
            }
            number => match string_kind(number) {
                Some(kind) => match decode_string(kind, &flatten_segments(&children)) {
                    Some(s) => Asn1Value::String(kind, s),
                    None => Asn1Value::Tagged(children),
                },
                None => Asn1Value::Tagged(children),
            },
        }
    }

    fn primitive(&mut self, tag: Asn1Tag, content: &[u8], depth: usize) -> Option<Asn1Value> {
        if tag.class != TagClass::Universal {
            return Some(Asn1Value::Any(content.to_vec()));
        }

        let value = match tag.number {
            tag::BOOLEAN => match content {
                [b] => Asn1Value::Boolean(*b != 0),
                _ => {
                    self.fail("BOOLEAN must hold exactly one octet");
                    return None;
                }
            },
            tag::INTEGER | tag::ENUMERATED => {
                if content.is_empty() {
                    self.fail("empty INTEGER");
                    return None;
                }
                Asn1Value::Integer(content.to_vec())
            }
            tag::BIT_STRING => match content.split_first() {
                Some((unused_bits, bytes)) if *unused_bits < 8 => Asn1Value::BitString {
                    unused_bits: *unused_bits,
                    bytes: bytes.to_vec(),
                },
                _ => {
                    self.fail("invalid BIT STRING");
                    return None;
                }
            },
            tag::OCTET_STRING => Asn1Value::OctetString {
                bytes: content.to_vec(),
                encapsulated: encapsulated(content, depth),
            },
            tag::NULL => Asn1Value::Null,
            tag::OBJECT_IDENTIFIER => match ObjectIdentifier::from_bytes(content) {
                Ok(oid) => Asn1Value::ObjectIdentifier(oid),
                Err(err) => {
                    self.fail(format!("invalid OBJECT IDENTIFIER: {}", err));
                    return None;
                }
            },
            tag::UTC_TIME | tag::GENERALIZED_TIME => {
                let utc = tag.number == tag::UTC_TIME;
                let parsed = std::str::from_utf8(content)
                    .ok()
                    .and_then(|text| parse_time(text, utc));
                match (parsed, utc) {
                    (Some(t), true) => Asn1Value::UtcTime(t),
                    (Some(t), false) => Asn1Value::GeneralizedTime(t),
                    (None, _) => {
                        self.fail(format!(
                            "invalid time value {:?}",
                            String::from_utf8_lossy(content)
                        ));
                        return None;
                    }
                }
            }
            number => match string_kind(number) {
                Some(kind) => match decode_string(kind, content) {
                    Some(s) => Asn1Value::String(kind, s),
                    None => Asn1Value::Any(content.to_vec()),
                },
                None => Asn1Value::Any(content.to_vec()),
            },
        };

        Some(value)
    }
}

fn flatten_segments(children: &[Asn1Node]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for child in children {
        match &child.value {
            Asn1Value::OctetString { bytes: inner, .. } => bytes.extend_from_slice(inner),
            _ => bytes.extend_from_slice(child.content()),
        }
    }
    bytes
}

fn encapsulated(bytes: &[u8], depth: usize) -> Vec<Asn1Node> {
    if depth >= MAX_DEPTH || !matches!(bytes.first(), Some(0x30) | Some(0x31)) {
        return Vec::new();
    }

    let mut decoder = Decoder {
        input: bytes,
        error: None,
    };
    let (nodes, end) = decoder.items(0, bytes.len(), false, depth + 1);

    if decoder.error.is_none() && nodes.len() == 1 && end == bytes.len() {
        nodes
    } else {
        Vec::new()
    }
}

fn string_kind(number: u32) -> Option<StringKind> {
    Some(match number {
        tag::UTF8_STRING => StringKind::Utf8,
        tag::NUMERIC_STRING => StringKind::Numeric,
        tag::PRINTABLE_STRING => StringKind::Printable,
        tag::TELETEX_STRING => StringKind::Teletex,
        tag::IA5_STRING => StringKind::Ia5,
        tag::VISIBLE_STRING => StringKind::Visible,
        tag::UNIVERSAL_STRING => StringKind::Universal,
        tag::BMP_STRING => StringKind::Bmp,
        _ => return None,
    })
}

fn decode_string(kind: StringKind, content: &[u8]) -> Option<String> {
    match kind {
        StringKind::Bmp => {
            if content.len() % 2 != 0 {
                return None;
            }
            let units = content
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]));
            char::decode_utf16(units).collect::<std::result::Result<String, _>>().ok()
        }
        StringKind::Universal => {
            if content.len() % 4 != 0 {
                return None;
            }
            content
                .chunks_exact(4)
                .map(|c| char::from_u32(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
                .collect()
        }
        // T.61 is treated as Latin-1, as most encoders do
        StringKind::Teletex => Some(content.iter().map(|b| *b as char).collect()),
        _ => String::from_utf8(content.to_vec()).ok(),
    }
}

/// Parses UTCTime (`two_digit_year`) or GeneralizedTime text into an instant.
pub(crate) fn parse_time(text: &str, two_digit_year: bool) -> Option<DateTime<Utc>> {
    if !text.is_ascii() {
        return None;
    }

    let (body, offset_secs) = split_zone(text)?;
    let (digits, fraction) = match body.find(|c| c == '.' || c == ',') {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let (year, rest) = if two_digit_year {
        let yy: i32 = digits.get(..2)?.parse().ok()?;
        (if yy >= 50 { 1900 + yy } else { 2000 + yy }, digits.get(2..)?)
    } else {
        (digits.get(..4)?.parse().ok()?, digits.get(4..)?)
    };
    if !matches!(rest.len(), 6 | 8 | 10) {
        return None;
    }

    let field = |range: Range<usize>| -> Option<u32> { rest.get(range)?.parse().ok() };
    let month = field(0..2)?;
    let day = field(2..4)?;
    let hour = field(4..6)?;
    let minute = if rest.len() >= 8 { field(6..8)? } else { 0 };
    let second = if rest.len() >= 10 { field(8..10)? } else { 0 };

    let nanos = match fraction {
        Some(f) if !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()) => {
            let mut padded: String = f.chars().take(9).collect();
            while padded.len() < 9 {
                padded.push('0');
            }
            padded.parse().ok()?
        }
        Some(_) => return None,
        None => 0,
    };

    let naive = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_nano_opt(hour, minute, second, nanos)?;
    let naive = naive.checked_sub_signed(chrono::Duration::seconds(offset_secs))?;

    Some(Utc.from_utc_datetime(&naive))
}

fn split_zone(text: &str) -> Option<(&str, i64)> {
    if let Some(body) = text.strip_suffix('Z') {
        return Some((body, 0));
    }

    if text.len() > 5 {
        let (body, zone) = text.split_at(text.len() - 5);
        let sign = match zone.as_bytes()[0] {
            b'+' => 1,
            b'-' => -1,
            _ => return Some((text, 0)),
        };
        let hh: i64 = zone[1..3].parse().ok()?;
        let mm: i64 = zone[3..5].parse().ok()?;
        return Some((body, sign * (hh * 3600 + mm * 60)));
    }

    Some((text, 0))
}
