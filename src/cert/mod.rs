pub mod chain;
pub mod name;

mod certificate;

use serde::{Deserialize, Serialize};

pub use certificate::{Certificate, Validity};
pub use chain::{order_certificates, validate_chain, ChainValidation};
pub use name::{DistinguishedName, RdnValue};

/// What the chain orderer needs to know about a certificate.
pub trait ChainMember {
    fn subject(&self) -> Option<&DistinguishedName>;
    fn issuer(&self) -> Option<&DistinguishedName>;
    fn name(&self) -> Option<&str>;
}

impl ChainMember for Certificate {
    fn subject(&self) -> Option<&DistinguishedName> {
        Some(&self.subject)
    }

    fn issuer(&self) -> Option<&DistinguishedName> {
        Some(&self.issuer)
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// Parsed certificate as exchanged in JSON, e.g. the output of a previous
/// `inspect` run. Unknown fields are carried through untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CertificateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<DistinguishedName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<DistinguishedName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChainMember for CertificateRecord {
    fn subject(&self) -> Option<&DistinguishedName> {
        self.subject.as_ref()
    }

    fn issuer(&self) -> Option<&DistinguishedName> {
        self.issuer.as_ref()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl From<&Certificate> for CertificateRecord {
    fn from(value: &Certificate) -> Self {
        Self {
            subject: Some(value.subject.clone()),
            issuer: Some(value.issuer.clone()),
            name: Some(value.name.clone()),
            extra: serde_json::Map::new(),
        }
    }
}
