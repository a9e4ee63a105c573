//! PDF level helpers: header and marker scans on raw bytes, and embedded
//! signature extraction through `lopdf`.

pub mod docmdp;
pub mod revision;

#[cfg(test)]
pub(crate) mod fixtures;

use std::ops::Range;

use lazy_static::lazy_static;
use lopdf::{xref::XrefEntry, Dictionary, Document, Object, ObjectId};
use regex::bytes::Regex;
use serde::Serialize;

use crate::errors::{PdfSignError, PdfSignErrorKind, PdfSignResult};

lazy_static! {
    static ref SIGNATURE_MARKERS: Regex =
        Regex::new(r"/ByteRange|/Type\s*/Sig\b|/DocMDP|/Perms").unwrap();
}

pub fn load(bytes: &[u8]) -> Result<Document, PdfSignError> {
    Document::load_mem(bytes).map_app_err(PdfSignErrorKind::InvalidPdf)
}

/// Whether the raw bytes already carry a signature or certification.
pub fn has_signature_markers(bytes: &[u8]) -> bool {
    SIGNATURE_MARKERS.is_match(bytes)
}

struct ExactArrayOrNone<T, const N: usize>(Option<[T; N]>);

impl<T: Copy + Default, const N: usize> FromIterator<T> for ExactArrayOrNone<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut array = [T::default(); N];
        let mut count = 0;
        for item in iter {
            if count == N {
                return ExactArrayOrNone(None);
            }
            array[count] = item;
            count += 1;
        }
        ExactArrayOrNone(if count == N { Some(array) } else { None })
    }
}

pub(crate) fn deref<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    doc.dereference(obj).ok().map(|(_, obj)| obj)
}

pub(crate) fn deref_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    deref(doc, obj)?.as_dict().ok()
}

pub(crate) fn name_is(dict: &Dictionary, key: &[u8], expected: &[u8]) -> bool {
    matches!(dict.get(key), Ok(Object::Name(name)) if name == expected)
}

/// `/ByteRange` of a signature dictionary as four integers.
pub(crate) fn byte_range(doc: &Document, sig: &Dictionary) -> Option<[i64; 4]> {
    deref(doc, sig.get(b"ByteRange").ok()?)?
        .as_array()
        .ok()?
        .iter()
        .map(|r| deref(doc, r).and_then(|r| r.as_i64().ok()))
        .collect::<Option<ExactArrayOrNone<i64, 4>>>()?
        .0
}

/// End of the signed bytes, when `/ByteRange` holds two ordered ranges that
/// lie inside a file of `len` bytes.
pub(crate) fn signed_end(range: [i64; 4], len: usize) -> Option<usize> {
    if range.iter().any(|r| *r < 0) {
        return None;
    }
    let first_end = range[0].checked_add(range[1])?;
    let end = usize::try_from(range[2].checked_add(range[3])?).ok()?;
    (first_end <= range[2] && end <= len).then_some(end)
}

/// Position of an object in the file, for ordering by first occurrence.
pub(crate) fn file_offset(doc: &Document, id: ObjectId) -> Option<u64> {
    match doc.reference_table.get(id.0)? {
        XrefEntry::Normal { offset, .. } => Some(*offset as u64),
        XrefEntry::Compressed { container, index } => match doc.reference_table.get(*container)? {
            XrefEntry::Normal { offset, .. } => Some(*offset as u64 + *index as u64),
            _ => None,
        },
        _ => None,
    }
}

/// A signature field from `/AcroForm /Fields`, in field order.
pub(crate) struct SignatureField<'a> {
    pub name: Option<String>,
    /// The `/V` signature dictionary, when the field is signed.
    pub value: Option<(Option<ObjectId>, &'a Dictionary)>,
}

fn is_signature_field(doc: &Document, field: &Dictionary) -> bool {
    match field.get(b"FT").ok().and_then(|ft| deref(doc, ft)) {
        Some(Object::Name(ft)) => ft == b"Sig",
        _ => false,
    }
}

/// Signature fields in `/Fields` order, descending into `/Kids`.
pub(crate) fn signature_fields(doc: &Document) -> Vec<SignatureField<'_>> {
    let mut result = Vec::new();

    let fields = doc
        .catalog()
        .ok()
        .and_then(|catalog| catalog.get(b"AcroForm").ok())
        .and_then(|acro_form| deref_dict(doc, acro_form))
        .and_then(|acro_form| acro_form.get(b"Fields").ok())
        .and_then(|fields| deref(doc, fields))
        .and_then(|fields| fields.as_array().ok());

    let mut stack: Vec<&Object> = match fields {
        Some(fields) => fields.iter().rev().collect(),
        None => return result,
    };
    let mut seen = std::collections::HashSet::new();

    while let Some(obj) = stack.pop() {
        if let Object::Reference(id) = obj {
            if !seen.insert(*id) {
                continue;
            }
        }
        let field = match deref_dict(doc, obj) {
            Some(field) => field,
            None => continue,
        };

        if is_signature_field(doc, field) {
            let value = field.get(b"V").ok().and_then(|v| match doc.dereference(v) {
                Ok((id, Object::Dictionary(dict))) => Some((id, dict)),
                _ => None,
            });
            let name = field
                .get(b"T")
                .ok()
                .and_then(|t| t.as_str().ok())
                .map(|t| String::from_utf8_lossy(t).into_owned());
            result.push(SignatureField {
                name,
                value,
            });
        } else if let Ok(Object::Array(kids)) = field.get(b"Kids") {
            stack.extend(kids.iter().rev());
        }
    }

    result
}

/// Decodes a PDF hex string, including the delimiters '<' and '>'.
///
/// Returns None if the string doesn't match `<[0-9A-Fa-f\s]*>`.
pub fn decode_pdf_hex_string(hex_input: &[u8]) -> Option<Vec<u8>> {
    if hex_input.first() != Some(&b'<') || hex_input.last() != Some(&b'>') {
        return None;
    }
    let hex_input = &hex_input[1..hex_input.len() - 1];

    let mut bytes = Vec::new();
    let mut hex_iter = hex_input.iter().filter_map(|&b| {
        let c = b as char;
        if c.is_whitespace() {
            None
        } else {
            Some(c.to_digit(16))
        }
    });

    while let Some(first) = hex_iter.next() {
        let first = first? as u8;
        let second = hex_iter.next().unwrap_or(Some(0))? as u8;
        bytes.push(first << 4 | second);
    }

    Some(bytes)
}

/// A signature embedded in a PDF.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EmbeddedSignature {
    pub field_name: Option<String>,
    pub sub_filter: Option<String>,
    pub byte_range: [usize; 4],
    /// `/Contents`, usually a DER PKCS#7 padded with zeros.
    #[serde(skip)]
    pub contents: Vec<u8>,
    /// The signed ranges end where the file ends.
    pub covers_whole_document: bool,
}

impl EmbeddedSignature {
    pub fn signed_ranges(self: &Self) -> [Range<usize>; 2] {
        let [a, b, c, d] = self.byte_range;
        [a..a + b, c..c + d]
    }

    pub fn signed_parts<'a>(self: &Self, pdf: &'a [u8]) -> [&'a [u8]; 2] {
        let [first, second] = self.signed_ranges();
        [&pdf[first], &pdf[second]]
    }

    pub fn is_timestamp(self: &Self) -> bool {
        self.sub_filter.as_deref() == Some("ETSI.RFC3161")
    }
}

fn invalid(message: impl Into<String>) -> PdfSignError {
    PdfSignError::new(PdfSignErrorKind::InvalidPdf, message)
}

fn embedded_signature(
    pdf: &[u8],
    doc: &Document,
    field: &SignatureField,
    sig: &Dictionary,
) -> Result<EmbeddedSignature, PdfSignError> {
    let label = field.name.clone().unwrap_or_else(|| "unnamed".to_owned());

    let range = byte_range(doc, sig)
        .ok_or_else(|| invalid(format!("{}: missing /ByteRange", label)))?;

    if range[0] != 0 {
        return Err(invalid(format!("{}: signed range does not start the file", label)));
    }
    if range[1..].iter().any(|r| *r < 0) {
        return Err(invalid(format!("{}: negative /ByteRange", label)));
    }
    let end = signed_end(range, pdf.len())
        .ok_or_else(|| invalid(format!("{}: /ByteRange outside the file", label)))?;

    // the skipped bytes are the hex encoded /Contents
    let skipped = decode_pdf_hex_string(&pdf[range[1] as usize..range[2] as usize])
        .ok_or_else(|| invalid(format!("{}: /Contents is not the skipped range", label)))?;
    let contents = sig
        .get(b"Contents")
        .ok()
        .and_then(|c| deref(doc, c))
        .and_then(|c| c.as_str().ok())
        .ok_or_else(|| invalid(format!("{}: missing /Contents", label)))?;
    if contents != skipped.as_slice() {
        return Err(invalid(format!("{}: /Contents is not the skipped range", label)));
    }

    let sub_filter = sig
        .get(b"SubFilter")
        .ok()
        .and_then(|s| s.as_name().ok())
        .map(|s| String::from_utf8_lossy(s).into_owned());

    Ok(EmbeddedSignature {
        field_name: field.name.clone(),
        sub_filter,
        byte_range: range.map(|r| r as usize),
        contents: skipped,
        covers_whole_document: end == pdf.len(),
    })
}

/// Signatures of the signed fields, in field order.
pub fn extract_signatures(pdf: &[u8]) -> Result<Vec<EmbeddedSignature>, PdfSignError> {
    let doc = load(pdf)?;

    signature_fields(&doc)
        .iter()
        .filter_map(|field| field.value.map(|(_, sig)| (field, sig)))
        .map(|(field, sig)| embedded_signature(pdf, &doc, field, sig))
        .collect()
}
