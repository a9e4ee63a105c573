use std::{collections::BTreeMap, fmt::Display};

use der::{
    asn1::{BmpString, Ia5StringRef, PrintableStringRef, TeletexStringRef, Utf8StringRef},
    Decode, Encode, Tag, Tagged,
};
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{oids::rdn_short_name, utils::to_hex_str};

/// Value of one RDN attribute. Multi-valued attributes (two `OU`s, say) are
/// kept as a list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RdnValue {
    Single(String),
    Multi(Vec<String>),
}

impl RdnValue {
    pub fn values(self: &Self) -> Vec<&str> {
        match self {
            RdnValue::Single(v) => vec![v.as_str()],
            RdnValue::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    fn push(self: &mut Self, value: String) {
        match self {
            RdnValue::Single(first) => {
                *self = RdnValue::Multi(vec![std::mem::take(first), value]);
            }
            RdnValue::Multi(vs) => vs.push(value),
        }
    }
}

impl Display for RdnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.values().join(", "))
    }
}

/// Subject or issuer: ordered `attribute -> value` map.
///
/// Equality is order-insensitive and ignores the scalar-vs-list encoding of
/// single values, empty attributes and attribute-name aliases such as
/// `commonName` for `CN`.
#[derive(Clone, Debug, Default)]
pub struct DistinguishedName(pub Vec<(String, RdnValue)>);

impl DistinguishedName {
    pub fn get(self: &Self, key: &str) -> Option<&RdnValue> {
        let key = canonical_key(key);
        self.0
            .iter()
            .find(|(k, _)| canonical_key(k) == key)
            .map(|(_, v)| v)
    }

    pub fn common_name(self: &Self) -> Option<&str> {
        self.get("CN").and_then(|v| v.values().into_iter().next())
    }

    pub fn is_empty(self: &Self) -> bool {
        self.0.is_empty()
    }

    /// OpenSSL style one-line name, `/C=BR/O=Org/CN=Name`.
    pub fn to_slash_string(self: &Self) -> String {
        self.0
            .iter()
            .flat_map(|(k, v)| v.values().into_iter().map(move |v| format!("/{}={}", k, v)))
            .collect()
    }

    fn insert(self: &mut Self, key: String, value: String) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => existing.push(value),
            None => self.0.push((key, RdnValue::Single(value))),
        }
    }

    /// Canonical form used for comparisons.
    pub fn normalized(self: &Self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in &self.0 {
            let values: Vec<String> = v
                .values()
                .into_iter()
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect();
            if values.is_empty() {
                continue;
            }
            map.entry(canonical_key(k)).or_default().extend(values);
        }
        for values in map.values_mut() {
            values.sort();
        }
        map
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for DistinguishedName {}

impl Display for DistinguishedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rdn = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}", rdn)
    }
}

impl Serialize for DistinguishedName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DistinguishedName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NameVisitor;

        impl<'de> Visitor<'de> for NameVisitor {
            type Value = DistinguishedName;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of RDN attributes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((k, v)) = access.next_entry::<String, RdnValue>()? {
                    entries.push((k, v));
                }
                Ok(DistinguishedName(entries))
            }
        }

        deserializer.deserialize_map(NameVisitor)
    }
}

fn canonical_key(key: &str) -> String {
    let key = key.trim();
    let alias = match key.to_ascii_lowercase().as_str() {
        "cn" | "commonname" => "CN",
        "o" | "organizationname" => "O",
        "ou" | "organizationalunitname" => "OU",
        "c" | "countryname" => "C",
        "st" | "stateorprovincename" => "ST",
        "l" | "localityname" => "L",
        "email" | "emailaddress" | "e" => "EMAILADDRESS",
        _ => return key.to_ascii_uppercase(),
    };
    alias.to_owned()
}

impl From<x509_cert::name::RdnSequence> for DistinguishedName {
    fn from(value: x509_cert::name::RdnSequence) -> Self {
        let mut name = DistinguishedName::default();

        for rdn in value.0.iter() {
            for tv in rdn.0.iter() {
                let val = match tv.value.tag() {
                    Tag::PrintableString => PrintableStringRef::try_from(&tv.value)
                        .ok()
                        .map(|s| s.to_string()),
                    Tag::Utf8String => Utf8StringRef::try_from(&tv.value)
                        .ok()
                        .map(|s| s.to_string()),
                    Tag::Ia5String => Ia5StringRef::try_from(&tv.value)
                        .ok()
                        .map(|s| s.to_string()),
                    Tag::TeletexString => TeletexStringRef::try_from(&tv.value)
                        .ok()
                        .map(|s| s.to_string()),
                    // UTF-16
                    Tag::BmpString => tv
                        .value
                        .to_der()
                        .ok()
                        .and_then(|der| BmpString::from_der(&der).ok())
                        .map(|s| s.to_string()),
                    _ => None,
                };

                let key = match rdn_short_name(&tv.oid) {
                    Some(key) => key.to_owned(),
                    None => tv.oid.to_string(),
                };

                let val = match val {
                    Some(val) => val,
                    None => format!("#{}", to_hex_str(tv.value.value())),
                };

                name.insert(key, val);
            }
        }

        name
    }
}
