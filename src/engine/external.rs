//! The external signing tool.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error};

use crate::{
    config::SigningConfig,
    errors::{PdfSignError, PdfSignErrorKind, PdfSignResult},
};

const TSA_MARKERS: [&str; 3] = ["Invalid TSA", "UnknownHostException", "TSAClientBouncyCastle"];

lazy_static! {
    // e.g. "hash.algorithm.too.old,The chosen hash algorithm (SHA256) requires PDF version 1.6"
    static ref HASH_MISMATCH_REGEX: Regex =
        Regex::new(r"(?im)^(?:[^,\r\n]*,)*\s*([^,\r\n]*chosen hash algorithm[^\r\n]*)$").unwrap();
}

/// One run of the signer over one document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignerInvocation {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// PKCS#12 keystore.
    pub keystore: PathBuf,
    pub password: String,
    pub args: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
pub trait ExternalSigner {
    /// Signs `invocation.input` and returns the signed document.
    fn sign(&self, invocation: &SignerInvocation) -> Result<Vec<u8>, PdfSignError>;
}

/// Maps the signer's diagnostics to a domain error.
pub fn classify_failure(output: &str) -> PdfSignError {
    if TSA_MARKERS.iter().any(|marker| output.contains(marker)) {
        return PdfSignError::new(PdfSignErrorKind::TsaConfiguration, "");
    }

    if let Some(line) = HASH_MISMATCH_REGEX
        .captures(output)
        .and_then(|caps| caps.get(1))
    {
        return PdfSignError::new(PdfSignErrorKind::HashAlgorithmMismatch, line.as_str().trim());
    }

    error!(output, "external signer failed");
    PdfSignError::new(PdfSignErrorKind::SigningFailed, "see the log for the signer output")
}

/// Runs JSignPdf through `java -jar`.
#[derive(Clone, Debug)]
pub struct JSignPdfSigner {
    java: PathBuf,
    jar: PathBuf,
    extra_args: Vec<String>,
}

impl JSignPdfSigner {
    pub fn new(config: &SigningConfig) -> Result<Self, PdfSignError> {
        let missing = |key: &str, path: &Path| {
            PdfSignError::new(
                PdfSignErrorKind::ConfigurationError,
                format!("{} {:?} does not exist, set it to an existing file", key, path),
            )
        };

        if !config.java_path.is_file() {
            return Err(missing("java_path", &config.java_path));
        }
        if !config.jsignpdf_jar_path.is_file() {
            return Err(missing("jsignpdf_jar_path", &config.jsignpdf_jar_path));
        }

        Ok(Self {
            java: config.java_path.clone(),
            jar: config.jsignpdf_jar_path.clone(),
            extra_args: config.extra_args.clone(),
        })
    }

    fn command(self: &Self, invocation: &SignerInvocation) -> Command {
        let mut command = Command::new(&self.java);
        command
            .arg("-jar")
            .arg(&self.jar)
            .args(["-kst", "PKCS12"])
            .arg("-ksf")
            .arg(&invocation.keystore)
            .arg("-ksp")
            .arg(&invocation.password)
            .args(&invocation.args)
            .args(&self.extra_args)
            .arg("-d")
            .arg(&invocation.output_dir)
            .arg(&invocation.input);
        command
    }
}

/// Where JSignPdf writes the signed copy of `input`.
pub fn signed_output_path(invocation: &SignerInvocation) -> PathBuf {
    let stem = invocation
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    invocation.output_dir.join(format!("{}_signed.pdf", stem))
}

impl ExternalSigner for JSignPdfSigner {
    fn sign(&self, invocation: &SignerInvocation) -> Result<Vec<u8>, PdfSignError> {
        debug!(input = %invocation.input.display(), args = ?invocation.args, "running JSignPdf");

        let output = self
            .command(invocation)
            .output()
            .map_app_err(PdfSignErrorKind::ConfigurationError)?;

        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        let signed = signed_output_path(invocation);
        if !output.status.success() || !signed.is_file() {
            return Err(classify_failure(&text));
        }

        fs::read(&signed).map_app_err(PdfSignErrorKind::IoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsa_failures() {
        for output in [
            "SEVERE: Invalid TSA 'http://tsa.invalid' response",
            "java.net.UnknownHostException: tsa.example.com",
            "at com.itextpdf.text.pdf.security.TSAClientBouncyCastle.getTimeStampToken",
        ] {
            let err = classify_failure(output);
            assert_eq!(err.kind, PdfSignErrorKind::TsaConfiguration);
            assert!(!err.to_string().contains("tsa.example.com"));
        }
    }

    #[test]
    fn hash_mismatch() {
        let output = "INFO: Loading keystore\n\
            SEVERE,hash.algorithm.too.old,The chosen hash algorithm (SHA512) requires PDF version 1.7\n\
            INFO: Finished";

        let err = classify_failure(output);

        assert_eq!(err.kind, PdfSignErrorKind::HashAlgorithmMismatch);
        assert_eq!(
            err.message,
            "The chosen hash algorithm (SHA512) requires PDF version 1.7"
        );
    }

    #[test]
    fn other_failures_are_generic() {
        let err = classify_failure("java.io.IOException: Keystore was tampered with");

        assert_eq!(err.kind, PdfSignErrorKind::SigningFailed);
        assert!(!err.to_string().contains("tampered"));
    }

    #[test]
    fn output_name() {
        let invocation = SignerInvocation {
            input: PathBuf::from("/tmp/work/pass-0.pdf"),
            output_dir: PathBuf::from("/tmp/work/out-0"),
            ..Default::default()
        };

        assert_eq!(
            signed_output_path(&invocation),
            PathBuf::from("/tmp/work/out-0/pass-0_signed.pdf")
        );
    }

    #[test]
    fn missing_java() {
        let config = SigningConfig {
            java_path: PathBuf::from("/nonexistent/java"),
            ..Default::default()
        };

        let err = JSignPdfSigner::new(&config).unwrap_err();
        assert_eq!(err.kind, PdfSignErrorKind::ConfigurationError);
        assert!(err.message.contains("java_path"));
    }

    #[test]
    fn command_line() {
        let signer = JSignPdfSigner {
            java: PathBuf::from("java"),
            jar: PathBuf::from("JSignPdf.jar"),
            extra_args: vec!["-q".to_owned()],
        };
        let invocation = SignerInvocation {
            input: PathBuf::from("in.pdf"),
            output_dir: PathBuf::from("out"),
            keystore: PathBuf::from("me.p12"),
            password: "pw".to_owned(),
            args: vec!["--hash-algorithm".to_owned(), "SHA256".to_owned()],
        };

        let command = signer.command(&invocation);
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(command.get_program(), "java");
        assert_eq!(
            args,
            vec![
                "-jar", "JSignPdf.jar", "-kst", "PKCS12", "-ksf", "me.p12", "-ksp", "pw",
                "--hash-algorithm", "SHA256", "-q", "-d", "out", "in.pdf"
            ]
        );
    }
}
