//! DocMDP certification: which signature certifies a document, at what
//! permission level, and whether later incremental updates respect it.

use lopdf::{Dictionary, Document, Object};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use super::{
    byte_range, deref, deref_dict, file_offset, name_is, revision, signature_fields, signed_end,
};
use crate::errors::PdfSignError;

/// The `/P` value of a DocMDP transform, 0 when the document is not
/// certified.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub enum DocMdpLevel {
    #[default]
    NotCertified = 0,
    CertifiedNoChanges = 1,
    CertifiedFormFilling = 2,
    CertifiedFormFillingAndAnnotations = 3,
}

/// What an incremental update does to a document.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    /// A change that fits no other category.
    Any,
    FormFill,
    AnnotationAdd,
    PageTemplate,
    Structural,
    AdditionalSignature,
}

impl DocMdpLevel {
    pub fn from_p(p: i64) -> Option<Self> {
        match p {
            1 => Some(Self::CertifiedNoChanges),
            2 => Some(Self::CertifiedFormFilling),
            3 => Some(Self::CertifiedFormFillingAndAnnotations),
            _ => None,
        }
    }

    pub fn value(self: &Self) -> u8 {
        *self as u8
    }

    pub fn is_certified(self: &Self) -> bool {
        *self != Self::NotCertified
    }

    pub fn allows_additional_signatures(self: &Self) -> bool {
        *self != Self::CertifiedNoChanges
    }

    pub fn allows(self: &Self, change: ChangeCategory) -> bool {
        use ChangeCategory::*;

        match self {
            Self::NotCertified => true,
            Self::CertifiedNoChanges => false,
            Self::CertifiedFormFilling => {
                matches!(change, FormFill | PageTemplate | AdditionalSignature)
            }
            Self::CertifiedFormFillingAndAnnotations => matches!(
                change,
                FormFill | AnnotationAdd | PageTemplate | AdditionalSignature
            ),
        }
    }

    /// Certification level name as the signer's `-cl` option expects it.
    pub fn signer_name(self: &Self) -> &'static str {
        match self {
            Self::NotCertified => "NOT_CERTIFIED",
            Self::CertifiedNoChanges => "CERTIFIED_NO_CHANGES_ALLOWED",
            Self::CertifiedFormFilling => "CERTIFIED_FORM_FILLING",
            Self::CertifiedFormFillingAndAnnotations => "CERTIFIED_FORM_FILLING_AND_ANNOTATIONS",
        }
    }
}

impl Serialize for DocMdpLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.value())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModificationStatus {
    #[default]
    Allowed,
    Violation,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ModificationValidation {
    pub valid: bool,
    pub status: ModificationStatus,
}

impl Default for ModificationValidation {
    fn default() -> Self {
        Self {
            valid: true,
            status: ModificationStatus::Allowed,
        }
    }
}

pub fn validate_modification(level: DocMdpLevel, change: ChangeCategory) -> ModificationValidation {
    if level.allows(change) {
        ModificationValidation::default()
    } else {
        ModificationValidation {
            valid: false,
            status: ModificationStatus::Violation,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DocMdp {
    pub level: DocMdpLevel,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DocMdpData {
    pub docmdp: DocMdp,
    pub modification_validation: ModificationValidation,
    /// Changes found after the certified revision.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<revision::Change>,
}

/// The `/Reference` entry with a DocMDP transform, if any.
fn docmdp_reference<'a>(doc: &'a Document, sig: &'a Dictionary) -> Option<&'a Dictionary> {
    let references = deref(doc, sig.get(b"Reference").ok()?)?.as_array().ok()?;

    references
        .iter()
        .filter_map(|r| deref_dict(doc, r))
        .find(|r| name_is(r, b"TransformMethod", b"DocMDP"))
}

/// Signature dictionaries ordered by their position in the file.
fn signature_dictionaries(doc: &Document) -> Vec<&Dictionary> {
    let mut sigs: Vec<(u64, &Dictionary)> = doc
        .objects
        .iter()
        .filter_map(|(id, obj)| match obj {
            Object::Dictionary(dict) if name_is(dict, b"Type", b"Sig") => {
                Some((file_offset(doc, *id).unwrap_or(u64::MAX), dict))
            }
            _ => None,
        })
        .collect();

    // signed fields may point at dictionaries without /Type
    for field in signature_fields(doc) {
        if let Some((id, dict)) = field.value {
            if !sigs.iter().any(|(_, known)| std::ptr::eq(*known, dict)) {
                let offset = id.and_then(|id| file_offset(doc, id)).unwrap_or(u64::MAX);
                sigs.push((offset, dict));
            }
        }
    }

    sigs.sort_by_key(|(offset, _)| *offset);
    sigs.into_iter().map(|(_, dict)| dict).collect()
}

/// Checks a certifying signature against ISO 32000-1 tables 252 and 253,
/// returning its `/P` value and the end of the bytes it signs.
fn permission(
    doc: &Document,
    sig: &Dictionary,
    reference: &Dictionary,
    len: usize,
) -> Result<(i64, usize), &'static str> {
    if sig.has(b"Type") && !name_is(sig, b"Type", b"Sig") {
        return Err("signature /Type is not /Sig");
    }
    if !sig.has(b"Filter") {
        return Err("signature has no /Filter");
    }
    let covered = byte_range(doc, sig)
        .and_then(|range| signed_end(range, len))
        .ok_or("signature has no valid /ByteRange")?;

    let params = reference
        .get(b"TransformParams")
        .ok()
        .and_then(|params| deref_dict(doc, params))
        .ok_or("reference has no /TransformParams")?;

    let version = match params.get(b"V").ok().and_then(|v| deref(doc, v)) {
        Some(Object::Name(v)) => v.as_slice(),
        Some(Object::String(v, _)) => v.as_slice(),
        _ => return Err("/TransformParams has no /V"),
    };
    if version != b"1.2" {
        return Err("/TransformParams /V is not 1.2");
    }

    match params.get(b"P").ok().and_then(|p| deref(doc, p)) {
        None => Ok((2, covered)),
        Some(Object::Integer(p)) if (1..=3).contains(p) => Ok((*p, covered)),
        Some(_) => Err("/P is not 1, 2 or 3"),
    }
}

/// Level of the certifying signature and the end of its signed bytes.
fn certification_level(doc: &Document, len: usize) -> (DocMdpLevel, Option<usize>) {
    let certifying: Vec<(&Dictionary, &Dictionary)> = signature_dictionaries(doc)
        .into_iter()
        .filter_map(|sig| docmdp_reference(doc, sig).map(|reference| (sig, reference)))
        .collect();

    let (sig, reference) = match certifying.as_slice() {
        [] => return (DocMdpLevel::NotCertified, None),
        [certifying] => *certifying,
        _ => {
            warn!(count = certifying.len(), "more than one DocMDP signature");
            return (DocMdpLevel::NotCertified, None);
        }
    };

    let first_signed = signature_fields(doc)
        .into_iter()
        .find_map(|field| field.value.map(|(_, value)| value));
    if let Some(first) = first_signed {
        if !std::ptr::eq(first, sig) {
            warn!("DocMDP signature is not the first signed field");
            return (DocMdpLevel::NotCertified, None);
        }
    }

    match permission(doc, sig, reference, len) {
        Ok((p, covered)) => match DocMdpLevel::from_p(p) {
            Some(level) => (level, Some(covered)),
            None => (DocMdpLevel::NotCertified, None),
        },
        Err(reason) => {
            warn!(reason, "DocMDP signature rejected");
            (DocMdpLevel::NotCertified, None)
        }
    }
}

/// Extracts the certification level of a PDF and checks the incremental
/// updates made after the certifying signature against it.
pub fn extract_docmdp_data(bytes: &[u8]) -> Result<DocMdpData, PdfSignError> {
    let doc = super::load(bytes)?;

    let (level, covered) = certification_level(&doc, bytes.len());
    let mut data = DocMdpData {
        docmdp: DocMdp { level },
        ..Default::default()
    };

    let covered = match covered {
        Some(covered) => covered,
        None => return Ok(data),
    };
    info!(level = level.value(), covered, "document is certified");

    if covered >= bytes.len() {
        return Ok(data);
    }

    data.changes = match revision::changes_since(bytes, &doc, covered) {
        Ok(changes) => changes,
        Err(err) => {
            warn!(%err, "certified revision could not be loaded");
            vec![revision::Change::unknown()]
        }
    };

    if let Some(change) = data.changes.iter().find(|change| !level.allows(change.category)) {
        debug!(object = ?change.object, category = ?change.category, "modification not permitted");
        data.modification_validation = validate_modification(level, change.category);
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{ChangeCategory::*, DocMdpLevel::*, *};
    use crate::pdf::fixtures::{
        certified, docmdp_reference as reference, signature_field, PdfBuilder, PAGES,
    };

    fn level_of(pdf: &[u8]) -> DocMdpLevel {
        extract_docmdp_data(pdf).unwrap().docmdp.level
    }

    fn certified_with(extra: &str) -> Vec<u8> {
        PdfBuilder::new("1.7")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R] >> >>")
            .object(2, PAGES)
            .object(3, "<< /Type /Page /Parent 2 0 R /Annots [4 0 R] >>")
            .object(4, &signature_field("Cert", 5))
            .signature(5, extra, b"\x30\x00")
            .finish(1)
            .build()
    }

    #[test]
    fn permission_table() {
        let all = [Any, FormFill, AnnotationAdd, PageTemplate, Structural, AdditionalSignature];

        assert!(all.iter().all(|c| NotCertified.allows(*c)));
        assert!(all.iter().all(|c| !CertifiedNoChanges.allows(*c)));

        let p2: Vec<_> = all.iter().filter(|c| CertifiedFormFilling.allows(**c)).collect();
        assert_eq!(p2, vec![&FormFill, &PageTemplate, &AdditionalSignature]);

        let p3: Vec<_> = all
            .iter()
            .filter(|c| CertifiedFormFillingAndAnnotations.allows(**c))
            .collect();
        assert_eq!(p3, vec![&FormFill, &AnnotationAdd, &PageTemplate, &AdditionalSignature]);
    }

    #[test]
    fn additional_signatures() {
        assert!(NotCertified.allows_additional_signatures());
        assert!(!CertifiedNoChanges.allows_additional_signatures());
        assert!(CertifiedFormFilling.allows_additional_signatures());
        assert!(CertifiedFormFillingAndAnnotations.allows_additional_signatures());
    }

    #[test]
    fn validation_result() {
        assert_eq!(
            validate_modification(CertifiedFormFilling, AnnotationAdd),
            ModificationValidation {
                valid: false,
                status: ModificationStatus::Violation
            }
        );
        assert_eq!(
            validate_modification(CertifiedFormFilling, FormFill),
            ModificationValidation {
                valid: true,
                status: ModificationStatus::Allowed
            }
        );
    }

    #[test]
    fn serialized_shape() {
        let data = extract_docmdp_data(&certified(1).build()).unwrap();

        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            serde_json::json!({
                "docmdp": { "level": 1 },
                "modification_validation": { "valid": true, "status": "ALLOWED" }
            })
        );
    }

    #[test]
    fn certified_levels() {
        assert_eq!(level_of(&certified(1).build()), CertifiedNoChanges);
        assert_eq!(level_of(&certified(2).build()), CertifiedFormFilling);
        assert_eq!(level_of(&certified(3).build()), CertifiedFormFillingAndAnnotations);
    }

    #[test]
    fn unsigned_and_approval_only() {
        assert_eq!(level_of(&PdfBuilder::unsigned("1.4")), NotCertified);
        assert_eq!(level_of(&PdfBuilder::approval_signed(b"\x30\x00")), NotCertified);
    }

    #[test]
    fn transform_version_must_be_1_2() {
        let filter = "/Filter /Adobe.PPKLite";

        assert_eq!(
            level_of(&certified_with(&format!("{} {}", filter, reference(2, "(1.2)")))),
            CertifiedFormFilling
        );
        assert_eq!(
            level_of(&certified_with(&format!("{} {}", filter, reference(2, "/1.3")))),
            NotCertified
        );
        assert_eq!(
            level_of(&certified_with(&format!(
                "{} /Reference [<< /TransformMethod /DocMDP /TransformParams << /P 2 >> >>]",
                filter
            ))),
            NotCertified
        );
    }

    #[test]
    fn default_and_invalid_p() {
        assert_eq!(
            level_of(&certified_with(
                "/Filter /Adobe.PPKLite /Reference [<< /TransformMethod /DocMDP /TransformParams << /V /1.2 >> >>]"
            )),
            CertifiedFormFilling
        );
        assert_eq!(
            level_of(&certified_with(&format!("/Filter /Adobe.PPKLite {}", reference(4, "/1.2")))),
            NotCertified
        );
    }

    #[test]
    fn overflowing_byte_range_is_not_certified() {
        let pdf = PdfBuilder::new("1.7")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R] >> >>")
            .object(2, PAGES)
            .object(3, "<< /Type /Page /Parent 2 0 R /Annots [4 0 R] >>")
            .object(4, &signature_field("Cert", 5))
            .object(
                5,
                &format!(
                    "<< /Type /Sig /Filter /Adobe.PPKLite /ByteRange [0 10 9223372036854775807 10] /Contents <3000> {} >>",
                    reference(2, "/1.2")
                ),
            )
            .finish(1)
            .build();

        let data = extract_docmdp_data(&pdf).unwrap();
        assert_eq!(data.docmdp.level, NotCertified);
        assert!(data.modification_validation.valid);
    }

    #[test]
    fn byte_range_past_the_end_is_not_certified() {
        let pdf = PdfBuilder::new("1.7")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R] >> >>")
            .object(2, PAGES)
            .object(3, "<< /Type /Page /Parent 2 0 R /Annots [4 0 R] >>")
            .object(4, &signature_field("Cert", 5))
            .object(
                5,
                &format!(
                    "<< /Type /Sig /Filter /Adobe.PPKLite /ByteRange [0 10 20 99999999] /Contents <3000> {} >>",
                    reference(1, "/1.2")
                ),
            )
            .finish(1)
            .build();

        assert_eq!(level_of(&pdf), NotCertified);
    }

    #[test]
    fn filter_is_required() {
        assert_eq!(level_of(&certified_with(&reference(1, "/1.2"))), NotCertified);
    }

    #[test]
    fn indirect_reference() {
        let pdf = PdfBuilder::new("1.7")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R] >> >>")
            .object(2, PAGES)
            .object(3, "<< /Type /Page /Parent 2 0 R /Annots [4 0 R] >>")
            .object(4, &signature_field("Cert", 5))
            .signature(5, "/Filter /Adobe.PPKLite /Reference 6 0 R", b"\x30\x00")
            .object(6, "[7 0 R]")
            .object(7, "<< /TransformMethod /DocMDP /TransformParams << /P 3 /V /1.2 >> >>")
            .finish(1)
            .build();

        assert_eq!(level_of(&pdf), CertifiedFormFillingAndAnnotations);
    }

    #[test]
    fn two_docmdp_signatures() {
        let extra = format!("/Filter /Adobe.PPKLite {}", reference(2, "/1.2"));
        let pdf = PdfBuilder::new("1.7")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R 6 0 R] >> >>")
            .object(2, PAGES)
            .object(3, "<< /Type /Page /Parent 2 0 R /Annots [4 0 R 6 0 R] >>")
            .object(4, &signature_field("Cert1", 5))
            .signature(5, &extra, b"\x30\x00")
            .object(6, &signature_field("Cert2", 7))
            .signature(7, &extra, b"\x30\x00")
            .finish(1)
            .build();

        assert_eq!(level_of(&pdf), NotCertified);
    }

    #[test]
    fn docmdp_must_be_first_signed_field() {
        let pdf = PdfBuilder::new("1.7")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [6 0 R 4 0 R] >> >>")
            .object(2, PAGES)
            .object(3, "<< /Type /Page /Parent 2 0 R /Annots [4 0 R 6 0 R] >>")
            .object(4, &signature_field("Cert", 5))
            .signature(
                5,
                &format!("/Filter /Adobe.PPKLite {}", reference(2, "/1.2")),
                b"\x30\x00",
            )
            .object(6, &signature_field("Approval", 7))
            .signature(7, "/Filter /Adobe.PPKLite", b"\x30\x00")
            .finish(1)
            .build();

        assert_eq!(level_of(&pdf), NotCertified);
    }

    #[test]
    fn unsigned_field_before_docmdp_is_ignored() {
        let pdf = PdfBuilder::new("1.7")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [6 0 R 4 0 R] >> >>")
            .object(2, PAGES)
            .object(3, "<< /Type /Page /Parent 2 0 R /Annots [4 0 R 6 0 R] >>")
            .object(4, &signature_field("Cert", 5))
            .signature(
                5,
                &format!("/Filter /Adobe.PPKLite {}", reference(3, "/1.2")),
                b"\x30\x00",
            )
            .object(6, "<< /FT /Sig /T (Empty) /Type /Annot /Subtype /Widget /Rect [0 0 0 0] /P 3 0 R >>")
            .finish(1)
            .build();

        assert_eq!(level_of(&pdf), CertifiedFormFillingAndAnnotations);
    }

    #[test]
    fn not_a_pdf() {
        assert!(extract_docmdp_data(b"%PDF-1.7\ngarbage").is_err());
    }
}
