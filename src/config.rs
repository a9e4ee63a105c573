//! Key-value configuration and the snapshot the signing engine reads.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde_json::{Map, Value};

use crate::{
    engine::HashAlgorithm,
    errors::{PdfSignError, PdfSignErrorKind, PdfSignResult},
    pdf::docmdp::DocMdpLevel,
};

/// Typed getters over a configuration store; missing or mistyped keys yield
/// the default.
pub trait ConfigSource {
    fn get_string(&self, key: &str, default: &str) -> String;
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_int(&self, key: &str, default: i64) -> i64;
    fn get_float(&self, key: &str, default: f64) -> f64;
    fn get_array(&self, key: &str) -> Vec<String>;
}

/// Configuration held in a JSON object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonConfig {
    values: Map<String, Value>,
}

impl JsonConfig {
    pub fn from_value(value: Value) -> Result<Self, PdfSignError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(PdfSignError::new(
                PdfSignErrorKind::ConfigurationError,
                format!("expected a JSON object, found {}", other),
            )),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, PdfSignError> {
        let text = fs::read_to_string(path).map_app_err(PdfSignErrorKind::IoError)?;
        text.parse()
    }

    pub fn set<V: Into<Value>>(self: &mut Self, key: &str, value: V) {
        self.values.insert(key.to_owned(), value.into());
    }
}

impl FromStr for JsonConfig {
    type Err = PdfSignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value =
            serde_json::from_str(s).map_app_err(PdfSignErrorKind::ConfigurationError)?;
        Self::from_value(value)
    }
}

impl ConfigSource for JsonConfig {
    fn get_string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_owned(),
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map_or(default, |n| n != 0),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => default,
            },
            _ => default,
        }
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_float(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_array(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TsaConfig {
    pub url: String,
    pub policy_oid: Option<String>,
    /// `PASSWORD` or `CERTIFICATE`, as the signer names them.
    pub auth_type: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SigningConfig {
    pub java_path: PathBuf,
    pub jsignpdf_jar_path: PathBuf,
    pub temp_path: PathBuf,
    pub hash_algorithm: HashAlgorithm,
    pub docmdp_enabled: bool,
    pub docmdp_level: i64,
    pub signature_width: f32,
    pub signature_height: f32,
    pub font_size: f32,
    pub render_mode: String,
    pub background_path: Option<PathBuf>,
    pub tsa: Option<TsaConfig>,
    /// Appended to every signer invocation.
    pub extra_args: Vec<String>,
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self::from_source(&JsonConfig::default())
    }
}

impl SigningConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let tsa = non_empty(source.get_string("tsa_url", "")).map(|url| TsaConfig {
            url,
            policy_oid: non_empty(source.get_string("tsa_policy_oid", "")),
            auth_type: non_empty(source.get_string("tsa_auth_type", "")),
            username: non_empty(source.get_string("tsa_username", "")),
            password: non_empty(source.get_string("tsa_password", "")),
        });

        let temp_path = match source.get_string("temp_path", "").as_str() {
            "" => std::env::temp_dir(),
            path => PathBuf::from(path),
        };

        Self {
            java_path: source.get_string("java_path", "").into(),
            jsignpdf_jar_path: source.get_string("jsignpdf_jar_path", "").into(),
            temp_path,
            hash_algorithm: HashAlgorithm::parse_or_default(
                &source.get_string("signature_hash_algorithm", "SHA256"),
            ),
            docmdp_enabled: source.get_bool("docmdp_enabled", false),
            docmdp_level: source.get_int("docmdp_level", 2),
            signature_width: source.get_float("signature_width", 350.0) as f32,
            signature_height: source.get_float("signature_height", 100.0) as f32,
            font_size: source.get_float("signature_font_size", 10.0) as f32,
            render_mode: source.get_string("signature_render_mode", "GRAPHIC_AND_DESCRIPTION"),
            background_path: non_empty(source.get_string("signature_background_path", ""))
                .map(PathBuf::from),
            tsa,
            extra_args: source.get_array("signer_extra_args"),
        }
    }

    /// Certification level applied when certification is enabled.
    pub fn certification_level(self: &Self) -> Result<DocMdpLevel, PdfSignError> {
        DocMdpLevel::from_p(self.docmdp_level).ok_or(PdfSignError::new(
            PdfSignErrorKind::ConfigurationError,
            format!("docmdp_level must be 1, 2 or 3, found {}", self.docmdp_level),
        ))
    }

    /// Checks everything the engine needs before a signer is run.
    pub fn validate(self: &Self) -> Result<(), PdfSignError> {
        if self.docmdp_enabled {
            self.certification_level()?;
        }

        if !self.temp_path.is_dir() {
            return Err(PdfSignError::new(
                PdfSignErrorKind::ConfigurationError,
                format!("temp_path {} is not a directory", self.temp_path.display()),
            ));
        }
        let writable = fs::metadata(&self.temp_path)
            .map(|meta| !meta.permissions().readonly())
            .unwrap_or(false);
        if !writable {
            return Err(PdfSignError::new(
                PdfSignErrorKind::ConfigurationError,
                format!("temp_path {} is not writable", self.temp_path.display()),
            ));
        }

        if !(self.signature_width > 0.0 && self.signature_height > 0.0) {
            return Err(PdfSignError::new(
                PdfSignErrorKind::ConfigurationError,
                "signature_width and signature_height must be positive",
            ));
        }

        if let Some(background) = &self.background_path {
            if !background.is_file() {
                return Err(PdfSignError::new(
                    PdfSignErrorKind::ConfigurationError,
                    format!("signature_background_path {} does not exist", background.display()),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn config(value: Value) -> JsonConfig {
        JsonConfig::from_value(value).unwrap()
    }

    #[test]
    fn typed_getters() {
        let source = config(json!({
            "s": "text",
            "n": 3,
            "f": "2.5",
            "b": "yes",
            "list": ["a", 1, null],
        }));

        assert_eq!(source.get_string("s", ""), "text");
        assert_eq!(source.get_string("n", ""), "3");
        assert_eq!(source.get_string("missing", "fallback"), "fallback");
        assert_eq!(source.get_int("n", 0), 3);
        assert_eq!(source.get_int("s", 7), 7);
        assert_eq!(source.get_float("f", 0.0), 2.5);
        assert!(source.get_bool("b", false));
        assert!(source.get_bool("n", false));
        assert!(!source.get_bool("missing", false));
        assert_eq!(source.get_array("list"), vec!["a", "1"]);
        assert!(source.get_array("s").is_empty());
    }

    #[test]
    fn not_an_object() {
        let err = JsonConfig::from_value(json!([1, 2])).unwrap_err();
        assert_eq!(err.kind, PdfSignErrorKind::ConfigurationError);

        let err = "{".parse::<JsonConfig>().unwrap_err();
        assert_eq!(err.kind, PdfSignErrorKind::ConfigurationError);
    }

    #[test]
    fn defaults() {
        let config = SigningConfig::default();

        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert!(!config.docmdp_enabled);
        assert_eq!(config.docmdp_level, 2);
        assert_eq!(config.signature_width, 350.0);
        assert_eq!(config.signature_height, 100.0);
        assert_eq!(config.font_size, 10.0);
        assert_eq!(config.render_mode, "GRAPHIC_AND_DESCRIPTION");
        assert_eq!(config.temp_path, std::env::temp_dir());
        assert_eq!(config.background_path, None);
        assert_eq!(config.tsa, None);
    }

    #[test]
    fn snapshot() {
        let source = config(json!({
            "signature_hash_algorithm": "sha512",
            "docmdp_enabled": true,
            "docmdp_level": "1",
            "tsa_url": "http://tsa.example.com",
            "tsa_auth_type": "PASSWORD",
            "tsa_username": "user",
            "tsa_password": "secret",
            "signer_extra_args": ["-q"],
        }));

        let config = SigningConfig::from_source(&source);

        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.certification_level().unwrap(), DocMdpLevel::CertifiedNoChanges);
        assert_eq!(
            config.tsa,
            Some(TsaConfig {
                url: "http://tsa.example.com".to_owned(),
                policy_oid: None,
                auth_type: Some("PASSWORD".to_owned()),
                username: Some("user".to_owned()),
                password: Some("secret".to_owned()),
            })
        );
        assert_eq!(config.extra_args, vec!["-q"]);
    }

    #[test]
    fn unsupported_hash_falls_back() {
        let config = SigningConfig::from_source(&config(json!({ "signature_hash_algorithm": "MD5" })));
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn validate_docmdp_level() {
        let mut config = SigningConfig::default();
        config.docmdp_enabled = true;
        config.docmdp_level = 5;

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind, PdfSignErrorKind::ConfigurationError);
        assert!(err.message.contains("docmdp_level"));

        config.docmdp_level = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_temp_path() {
        let mut config = SigningConfig::default();
        config.temp_path = PathBuf::from("/nonexistent/pdfsign-temp");

        let err = config.validate().unwrap_err();
        assert!(err.message.contains("temp_path"));
    }
}
