//! Signing orchestration: parameters for the external signer, visible
//! signature passes and certification.

pub mod external;
mod glyphs;
pub mod hash;
#[cfg(feature = "openssl")]
pub mod pkcs7;
pub mod visible;

use std::{
    fs,
    path::{Path, PathBuf},
};

use image::RgbaImage;
use serde::Serialize;
use tracing::info;

use crate::{
    config::SigningConfig,
    errors::{PdfSignError, PdfSignErrorKind, PdfSignResult},
    pdf::{docmdp::DocMdpLevel, has_signature_markers},
};

pub use external::{ExternalSigner, JSignPdfSigner, SignerInvocation};
pub use hash::{normalize_pdf_version, select_hash_algorithm, HashAlgorithm, PdfVersion};
pub use visible::VisibleElement;

/// What to sign with and where.
#[derive(Clone, Debug, Default)]
pub struct SignRequest {
    /// PKCS#12 keystore.
    pub keystore: PathBuf,
    pub password: String,
    /// Visible signatures, signed one after another.
    pub elements: Vec<VisibleElement>,
    /// Description drawn in visible signatures, the keystore's common name
    /// when unset.
    pub text: Option<String>,
    pub signature_image: Option<RgbaImage>,
}

/// Parameters shared by every signer run of one document.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SigningPlan {
    pub version: PdfVersion,
    /// Set when the header was rewritten.
    pub rewritten_from: Option<PdfVersion>,
    pub hash_algorithm: HashAlgorithm,
    pub certification: Option<DocMdpLevel>,
    pub args: Vec<String>,
}

fn certification_args(level: Option<DocMdpLevel>) -> Vec<String> {
    match level {
        Some(level) => vec!["-cl".to_owned(), level.signer_name().to_owned()],
        None => vec![],
    }
}

/// Common name of the keystore certificate.
#[cfg(feature = "openssl")]
fn signer_name(request: &SignRequest) -> Result<String, PdfSignError> {
    let keystore = fs::read(&request.keystore).map_app_err(PdfSignErrorKind::IoError)?;
    pkcs7::common_name(&keystore, &request.password)
}

#[cfg(not(feature = "openssl"))]
fn signer_name(_request: &SignRequest) -> Result<String, PdfSignError> {
    Err(PdfSignError::new(
        PdfSignErrorKind::MissingCommonName,
        "reading the keystore needs the openssl feature",
    ))
}

pub struct SignatureEngine<S> {
    config: SigningConfig,
    signer: S,
}

impl<S: ExternalSigner> SignatureEngine<S> {
    pub fn new(config: SigningConfig, signer: S) -> Result<Self, PdfSignError> {
        config.validate()?;
        Ok(Self { config, signer })
    }

    pub fn config(self: &Self) -> &SigningConfig {
        &self.config
    }

    fn certification(
        self: &Self,
        pdf: &[u8],
        request: &SignRequest,
    ) -> Result<Option<DocMdpLevel>, PdfSignError> {
        if !self.config.docmdp_enabled {
            return Ok(None);
        }
        if !request.elements.is_empty() {
            info!("visible signature requested, document is not certified");
            return Ok(None);
        }
        if has_signature_markers(pdf) {
            info!("document is already signed, it cannot be certified");
            return Ok(None);
        }

        let level = self.config.certification_level()?;
        info!(level = level.signer_name(), "certifying document");
        Ok(Some(level))
    }

    fn tsa_args(self: &Self) -> Vec<String> {
        let tsa = match &self.config.tsa {
            Some(tsa) => tsa,
            None => return vec![],
        };

        let mut args = vec!["--tsa-server-url".to_owned(), tsa.url.clone()];
        let optional = [
            ("--tsa-policy-oid", &tsa.policy_oid),
            ("--tsa-authentication", &tsa.auth_type),
            ("--tsa-user", &tsa.username),
            ("--tsa-password", &tsa.password),
        ];
        for (flag, value) in optional {
            if let Some(value) = value {
                args.push(flag.to_owned());
                args.push(value.clone());
            }
        }
        args
    }

    /// Rewrites the header of `pdf` if needed and decides the parameters
    /// every signer run shares.
    pub fn plan(
        self: &Self,
        pdf: &mut [u8],
        request: &SignRequest,
    ) -> Result<SigningPlan, PdfSignError> {
        let configured = self.config.hash_algorithm;

        let original = PdfVersion::from_header(pdf)?;
        let rewritten = normalize_pdf_version(pdf, configured)?;
        let version = rewritten.unwrap_or(original);
        let hash_algorithm = select_hash_algorithm(version, configured);

        let mut args = vec!["--hash-algorithm".to_owned(), hash_algorithm.name().to_owned()];
        args.extend(self.tsa_args());

        Ok(SigningPlan {
            version,
            rewritten_from: rewritten.map(|_| original),
            hash_algorithm,
            certification: self.certification(pdf, request)?,
            args,
        })
    }

    /// Placement, text and artwork arguments of one visible signature. The
    /// artwork is written to `workdir`.
    fn element_args(
        self: &Self,
        element: &VisibleElement,
        request: &SignRequest,
        text: &str,
        background: Option<&RgbaImage>,
        workdir: &Path,
        index: usize,
    ) -> Result<Vec<String>, PdfSignError> {
        let mut args = element.args();
        args.extend([
            "--font-size".to_owned(),
            self.config.font_size.to_string(),
            "--render-mode".to_owned(),
            self.config.render_mode.clone(),
            "--l2-text".to_owned(),
            visible::escape_text(text),
        ]);

        let scale = visible::scale_factor(element.width(), self.config.signature_width);

        if let Some(background) = background {
            let canvas = visible::compose(element, scale, Some(background), None);
            let path = workdir.join(format!("element-{}-bg.png", index));
            visible::save_png(&canvas, &path)?;
            args.extend(["--bg-path".to_owned(), path.to_string_lossy().into_owned()]);
        }

        let name = visible::name_image(
            element,
            scale,
            request.signature_image.as_ref(),
            text,
            self.config.font_size,
        );
        let path = workdir.join(format!("element-{}-name.png", index));
        visible::save_png(&name, &path)?;
        args.extend(["--img-path".to_owned(), path.to_string_lossy().into_owned()]);

        Ok(args)
    }

    fn run(
        self: &Self,
        workdir: &Path,
        pdf: &[u8],
        args: Vec<String>,
        index: usize,
        request: &SignRequest,
    ) -> Result<Vec<u8>, PdfSignError> {
        let input = workdir.join(format!("pass-{}.pdf", index));
        fs::write(&input, pdf).map_app_err(PdfSignErrorKind::ResourceError)?;

        let output_dir = workdir.join(format!("out-{}", index));
        fs::create_dir(&output_dir).map_app_err(PdfSignErrorKind::ResourceError)?;

        self.signer.sign(&SignerInvocation {
            input,
            output_dir,
            keystore: request.keystore.clone(),
            password: request.password.clone(),
            args,
        })
    }

    /// Signs `pdf`, once per visible element or once invisibly.
    ///
    /// Every element signs the output of the previous one. Intermediate
    /// files live in a temporary directory under `temp_path` that is removed
    /// when this returns.
    pub fn sign(self: &Self, pdf: &[u8], request: &SignRequest) -> Result<Vec<u8>, PdfSignError> {
        let mut pdf = pdf.to_vec();
        let plan = self.plan(&mut pdf, request)?;

        let workdir = tempfile::Builder::new()
            .prefix("pdfsign-")
            .tempdir_in(&self.config.temp_path)
            .map_app_err(PdfSignErrorKind::ResourceError)?;

        if request.elements.is_empty() {
            let mut args = plan.args.clone();
            args.extend(certification_args(plan.certification));
            return self.run(workdir.path(), &pdf, args, 0, request);
        }

        let text = match &request.text {
            Some(text) => text.clone(),
            None => signer_name(request)?,
        };
        let background = self
            .config
            .background_path
            .as_ref()
            .map(visible::load_image)
            .transpose()?;

        let (signed, _) = request.elements.iter().enumerate().try_fold(
            (pdf, plan.certification),
            |(current, certification), (index, element)| {
                let mut args = plan.args.clone();
                // 只有第一次签名可以认证
                args.extend(certification_args(certification));
                args.extend(self.element_args(
                    element,
                    request,
                    &text,
                    background.as_ref(),
                    workdir.path(),
                    index,
                )?);

                let signed = self.run(workdir.path(), &current, args, index, request)?;
                Ok::<_, PdfSignError>((signed, None))
            },
        )?;

        info!(passes = request.elements.len(), "document signed");
        Ok(signed)
    }
}
