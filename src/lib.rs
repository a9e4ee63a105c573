//! Signing and trust validation for digitally signed PDF documents.
//!
//! * [`cert::order_certificates`] orders an unordered certificate set leaf first.
//! * [`tsa::extract`] recovers the RFC 3161 timestamp of a CMS signature.
//! * [`pdf::docmdp::extract_docmdp_data`] reads the certification level of a
//!   document and checks the revisions appended after it.
//! * [`engine::SignatureEngine`] prepares the parameters of an external signer
//!   and runs it once per visible signature.
//! * [`verify::inspect`] reports on every signature of a signed document.

pub mod asn1;
pub mod cert;
pub mod config;
pub mod engine;
pub mod errors;
pub mod oids;
pub mod pdf;
pub mod signed_data;
pub mod store;
pub mod tsa;
pub mod utils;
pub mod verify;

pub use der;

pub use cert::{order_certificates, validate_chain, Certificate, ChainValidation};
pub use config::{ConfigSource, JsonConfig, SigningConfig};
pub use engine::{SignRequest, SignatureEngine};
pub use errors::{PdfSignError, PdfSignErrorKind, PdfSignResult};
pub use pdf::docmdp::{extract_docmdp_data, DocMdpData, DocMdpLevel};
pub use tsa::TimestampToken;
pub use verify::{inspect, VerificationReport};
