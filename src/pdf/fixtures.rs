//! Hand-assembled PDF files with real `/ByteRange` values, so signatures and
//! incremental updates can be tested without binary fixtures.

use crate::utils::to_hex_str;

pub(crate) const PAGES: &str = "<< /Type /Pages /Kids [3 0 R] /Count 1 >>";
pub(crate) const PAGE: &str = "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>";

const CONTENTS_PADDING: usize = 32;

struct Placeholder {
    byte_range: usize,
    contents_start: usize,
    contents_end: usize,
}

pub(crate) struct PdfBuilder {
    buf: Vec<u8>,
    section: Vec<(u32, usize)>,
    pending: Vec<Placeholder>,
    prev_xref: Option<usize>,
    size: u32,
}

impl PdfBuilder {
    pub fn new(version: &str) -> Self {
        let mut buf = format!("%PDF-{}\n", version).into_bytes();
        buf.extend_from_slice(b"%\xe2\xe3\xcf\xd3\n");
        Self {
            buf,
            section: vec![],
            pending: vec![],
            prev_xref: None,
            size: 1,
        }
    }

    pub fn object(mut self, id: u32, body: &str) -> Self {
        self.section.push((id, self.buf.len()));
        self.size = self.size.max(id + 1);
        self.buf
            .extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
        self
    }

    /// Writes a signature dictionary whose `/ByteRange` is filled in by
    /// [`PdfBuilder::finish`] to cover the file up to that point.
    pub fn signature(mut self, id: u32, extra: &str, contents: &[u8]) -> Self {
        self.section.push((id, self.buf.len()));
        self.size = self.size.max(id + 1);

        self.buf
            .extend_from_slice(format!("{} 0 obj\n<< /Type /Sig {} /ByteRange ", id, extra).as_bytes());
        let byte_range = self.buf.len();
        self.buf
            .extend_from_slice(b"[0000000000 0000000000 0000000000 0000000000] /Contents ");
        let contents_start = self.buf.len();
        let hex = to_hex_str(contents) + &"0".repeat(CONTENTS_PADDING);
        self.buf.extend_from_slice(format!("<{}>", hex).as_bytes());
        let contents_end = self.buf.len();
        self.buf.extend_from_slice(b" >>\nendobj\n");

        self.pending.push(Placeholder {
            byte_range,
            contents_start,
            contents_end,
        });
        self
    }

    /// Closes the current revision with its xref table and trailer.
    pub fn finish(mut self, root: u32) -> Self {
        let xref = self.buf.len();
        let mut table = String::from("xref\n");
        if self.prev_xref.is_none() {
            table.push_str("0 1\n0000000000 65535 f \n");
        }
        for (id, offset) in &self.section {
            table.push_str(&format!("{} 1\n{:010} 00000 n \n", id, offset));
        }
        table.push_str(&format!("trailer\n<< /Size {} /Root {} 0 R", self.size, root));
        if let Some(prev) = self.prev_xref {
            table.push_str(&format!(" /Prev {}", prev));
        }
        table.push_str(&format!(" >>\nstartxref\n{}\n%%EOF\n", xref));
        self.buf.extend_from_slice(table.as_bytes());

        let end = self.buf.len();
        for p in self.pending.drain(..) {
            let range = format!(
                "[{:010} {:010} {:010} {:010}]",
                0,
                p.contents_start,
                p.contents_end,
                end - p.contents_end
            );
            self.buf[p.byte_range..p.byte_range + range.len()].copy_from_slice(range.as_bytes());
        }

        self.section.clear();
        self.prev_xref = Some(xref);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }

    pub fn unsigned(version: &str) -> Vec<u8> {
        Self::new(version)
            .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
            .object(2, PAGES)
            .object(3, PAGE)
            .finish(1)
            .build()
    }

    pub fn approval_signed(contents: &[u8]) -> Vec<u8> {
        Self::new("1.7")
            .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R] /SigFlags 3 >> >>")
            .object(2, PAGES)
            .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [4 0 R] >>")
            .object(4, &signature_field("Signature1", 5))
            .signature(
                5,
                "/Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached",
                contents,
            )
            .finish(1)
            .build()
    }
}

/// A merged signature field and widget on page 3.
pub(crate) fn signature_field(name: &str, value: u32) -> String {
    format!(
        "<< /FT /Sig /T ({}) /V {} 0 R /Type /Annot /Subtype /Widget /Rect [0 0 0 0] /P 3 0 R >>",
        name, value
    )
}

pub(crate) fn docmdp_reference(p: i64, version: &str) -> String {
    format!(
        "/Reference [<< /Type /SigRef /TransformMethod /DocMDP /TransformParams << /Type /TransformParams /P {} /V {} >> >>]",
        p, version
    )
}

/// A document certified by its only signature, in field `Cert`.
pub(crate) fn certified(p: i64) -> PdfBuilder {
    PdfBuilder::new("1.7")
        .object(
            1,
            "<< /Type /Catalog /Pages 2 0 R /AcroForm 6 0 R /Perms << /DocMDP 5 0 R >> >>",
        )
        .object(2, PAGES)
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [4 0 R] >>")
        .object(4, &signature_field("Cert", 5))
        .signature(
            5,
            &format!(
                "/Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached {}",
                docmdp_reference(p, "/1.2")
            ),
            b"\x30\x00",
        )
        .object(6, "<< /Fields [4 0 R] /SigFlags 3 >>")
        .finish(1)
}
