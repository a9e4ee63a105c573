//! Classification of the objects an incremental update adds or replaces.

use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use tracing::debug;

use super::{deref_dict, docmdp::ChangeCategory, file_offset, name_is};
use crate::errors::{PdfSignError, PdfSignErrorKind, PdfSignResult};

const FILL_KEYS: &[&[u8]] = &[b"V", b"AS", b"AP"];
const SIGN_KEYS: &[&[u8]] = &[b"V", b"AS", b"AP", b"F"];
const CATALOG_KEYS: &[&[u8]] = &[b"AcroForm", b"DSS", b"Extensions"];
const ACRO_FORM_KEYS: &[&[u8]] = &[b"Fields", b"SigFlags", b"DR", b"DA", b"NeedAppearances"];
const PAGE_KEYS: &[&[u8]] = &[b"Annots"];
const PAGE_TREE_KEYS: &[&[u8]] = &[b"Kids", b"Count"];

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Change {
    /// `None` when the update could not be attributed to an object.
    pub object: Option<ObjectId>,
    pub category: ChangeCategory,
}

impl Change {
    pub(crate) fn unknown() -> Self {
        Self {
            object: None,
            category: ChangeCategory::Any,
        }
    }
}

fn changed_keys<'a>(current: &'a Dictionary, previous: &'a Dictionary) -> Vec<&'a [u8]> {
    let mut keys: Vec<&[u8]> = current
        .iter()
        .filter(|(key, value)| previous.get(key).ok() != Some(*value))
        .map(|(key, _)| key.as_slice())
        .collect();
    keys.extend(
        previous
            .iter()
            .filter(|(key, _)| !current.has(key))
            .map(|(key, _)| key.as_slice()),
    );
    keys
}

fn only(changed: &[&[u8]], allowed: &[&[u8]]) -> bool {
    changed.iter().all(|key| allowed.contains(key))
}

fn is_signature(dict: &Dictionary) -> bool {
    name_is(dict, b"Type", b"Sig") || name_is(dict, b"Type", b"DocTimeStamp")
}

fn is_annotation(dict: &Dictionary) -> bool {
    name_is(dict, b"Type", b"Annot") || (dict.has(b"Subtype") && dict.has(b"Rect"))
}

fn is_template_page(obj: &Object) -> bool {
    match obj {
        Object::Dictionary(dict) => {
            name_is(dict, b"Type", b"Page") && dict.has(b"TemplateInstantiated")
        }
        _ => false,
    }
}

/// `/FT` of a field or widget, inherited through `/Parent`.
fn field_type<'a>(doc: &'a Document, mut dict: &'a Dictionary) -> Option<&'a [u8]> {
    for _ in 0..32 {
        if let Ok(Object::Name(ft)) = dict.get(b"FT") {
            return Some(ft);
        }
        dict = deref_dict(doc, dict.get(b"Parent").ok()?)?;
    }
    None
}

fn added(doc: &Document, dict: &Dictionary) -> Option<ChangeCategory> {
    use ChangeCategory::*;

    if is_signature(dict) {
        return Some(AdditionalSignature);
    }
    if dict.has(b"FT") || name_is(dict, b"Subtype", b"Widget") {
        return match field_type(doc, dict) {
            Some(b"Sig") => Some(AdditionalSignature),
            _ => Some(Structural),
        };
    }
    if is_annotation(dict) {
        return Some(AnnotationAdd);
    }
    if name_is(dict, b"Type", b"Page") {
        return match dict.has(b"TemplateInstantiated") {
            true => Some(PageTemplate),
            false => Some(Structural),
        };
    }
    None
}

fn modified(
    doc: &Document,
    dict: &Dictionary,
    previous: &Dictionary,
    template_added: bool,
) -> Option<ChangeCategory> {
    use ChangeCategory::*;

    let changed = changed_keys(dict, previous);

    if is_signature(dict) {
        return Some(AdditionalSignature);
    }
    if dict.has(b"FT") || name_is(dict, b"Subtype", b"Widget") {
        return match field_type(doc, dict) {
            Some(b"Sig") if only(&changed, SIGN_KEYS) => Some(AdditionalSignature),
            _ if only(&changed, FILL_KEYS) => Some(FormFill),
            _ => Some(Structural),
        };
    }
    if is_annotation(dict) {
        return Some(AnnotationAdd);
    }

    let neutral = match dict.get(b"Type") {
        Ok(Object::Name(t)) if t == b"Page" => only(&changed, PAGE_KEYS),
        Ok(Object::Name(t)) if t == b"Pages" => {
            if template_added && only(&changed, PAGE_TREE_KEYS) {
                return Some(PageTemplate);
            }
            false
        }
        Ok(Object::Name(t)) if t == b"Catalog" => only(&changed, CATALOG_KEYS),
        _ if dict.has(b"Fields") => only(&changed, ACRO_FORM_KEYS),
        _ => false,
    };

    match neutral {
        true => None,
        false => Some(Structural),
    }
}

fn classify(
    doc: &Document,
    obj: &Object,
    previous: Option<&Object>,
    template_added: bool,
) -> Option<ChangeCategory> {
    match (obj, previous) {
        (Object::Dictionary(dict), None) => added(doc, dict),
        (Object::Dictionary(dict), Some(Object::Dictionary(previous))) => {
            modified(doc, dict, previous, template_added)
        }
        // 新增的对象本身不算修改, 被引用时才有意义
        (_, None) | (Object::Array(_), _) => None,
        (Object::Stream(stream), Some(_)) if name_is(&stream.dict, b"Type", b"XObject") => None,
        _ => Some(ChangeCategory::Structural),
    }
}

/// Changes made by the incremental updates stored after `covered`, the end of
/// the certified revision.
///
/// Objects rewritten with identical content and neutral bookkeeping (page
/// `/Annots`, the AcroForm field list, catalog `/DSS`) are not reported.
pub fn changes_since(
    bytes: &[u8],
    doc: &Document,
    covered: usize,
) -> Result<Vec<Change>, PdfSignError> {
    let previous =
        Document::load_mem(&bytes[..covered]).map_app_err(PdfSignErrorKind::InvalidPdf)?;

    let updated: Vec<(ObjectId, &Object)> = doc
        .objects
        .iter()
        .filter(|(id, _)| file_offset(doc, **id).map_or(false, |offset| offset >= covered as u64))
        .map(|(id, obj)| (*id, obj))
        .collect();

    let template_added = updated
        .iter()
        .any(|(id, obj)| !previous.objects.contains_key(id) && is_template_page(obj));

    let mut changes = vec![];
    for (id, obj) in updated {
        let before = previous.objects.get(&id);
        if before == Some(obj) {
            continue;
        }
        if let Some(category) = classify(doc, obj, before, template_added) {
            debug!(?id, ?category, "change after certification");
            changes.push(Change {
                object: Some(id),
                category,
            });
        }
    }

    Ok(changes)
}
