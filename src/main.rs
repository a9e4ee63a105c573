use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use pretty_hex::pretty_hex;
use serde::Serialize;
use tracing::info;

use pdfsign::{
    cert::{order_certificates, validate_chain, Certificate},
    config::{JsonConfig, SigningConfig},
    engine::{visible, JSignPdfSigner, SignRequest, SignatureEngine, VisibleElement},
    pdf::{docmdp::extract_docmdp_data, extract_signatures},
    store::{DocumentStore, FileStore},
    tsa, verify,
};

#[derive(Parser)]
#[command(name = "pdfsign")]
#[command(about = "Sign PDF documents and inspect their signatures")]
#[command(long_about = "
pdfsign - PDF signing and signature inspection

EXAMPLES:
    # Order a PEM bundle leaf first
    pdfsign chain bundle.pem

    # Certification level and modification check
    pdfsign docmdp contract.pdf

    # Sign with two visible signatures
    pdfsign sign contract.pdf -c signing.json --pfx me.p12 --password secret \\
        --element 1,50,50,250,110 --element 3,50,50,250,110

ENVIRONMENT VARIABLES:
    RUST_LOG        Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Order the certificates of a PEM bundle
    Chain {
        #[arg(value_name = "PEM_FILE")]
        file: PathBuf,
    },

    /// Show the timestamp tokens of a PDF or of a CMS signature file
    Timestamp {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Hex dump of each message imprint
        #[arg(long)]
        hexdump: bool,
    },

    /// Show the DocMDP certification level and modification check
    Docmdp {
        #[arg(value_name = "PDF_FILE")]
        file: PathBuf,
    },

    /// Report on every signature of a PDF
    Inspect {
        #[arg(value_name = "PDF_FILE")]
        file: PathBuf,
    },

    /// Sign a PDF with JSignPdf
    Sign {
        #[arg(value_name = "PDF_FILE")]
        file: PathBuf,

        /// JSON configuration file
        #[arg(short, long, value_name = "CONFIG_FILE")]
        config: PathBuf,

        /// PKCS#12 keystore
        #[arg(long, value_name = "PFX_FILE")]
        pfx: PathBuf,

        #[arg(long, env = "PDFSIGN_PASSWORD", hide_env_values = true)]
        password: String,

        /// Visible signature as page,llx,lly,urx,ury (repeatable)
        #[arg(long = "element", value_name = "PLACEMENT")]
        elements: Vec<VisibleElement>,

        /// Text drawn in visible signatures, the certificate CN by default
        #[arg(long)]
        text: Option<String>,

        /// Image drawn in visible signatures
        #[arg(long, value_name = "IMAGE_FILE")]
        signature_image: Option<PathBuf>,

        /// Output file (defaults to overwriting the input)
        #[arg(short, long, value_name = "OUTPUT_FILE")]
        output: Option<PathBuf>,

        /// Print the signing plan without running the signer
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a detached PKCS#7 signature (<file>.p7s)
    SignDetached {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long, value_name = "PFX_FILE")]
        pfx: PathBuf,

        #[arg(long, env = "PDFSIGN_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn timestamps(bytes: &[u8]) -> Result<Vec<Option<tsa::TimestampToken>>, Box<dyn Error>> {
    if !bytes.starts_with(b"%PDF-") {
        return Ok(vec![tsa::extract(bytes)]);
    }

    Ok(extract_signatures(bytes)?
        .iter()
        .map(|sig| tsa::extract(&sig.contents))
        .collect())
}

#[cfg(feature = "openssl")]
fn sign_detached(file: &Path, pfx: &[u8], password: &str) -> Result<PathBuf, Box<dyn Error>> {
    Ok(pdfsign::engine::pkcs7::sign_file(file, pfx, password)?)
}

#[cfg(not(feature = "openssl"))]
fn sign_detached(_file: &Path, _pfx: &[u8], _password: &str) -> Result<PathBuf, Box<dyn Error>> {
    Err("built without the openssl feature".into())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pdfsign=warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chain { file } => {
            let certs = Certificate::load_pem_chain(&fs::read_to_string(file)?)?;
            let chain = order_certificates(certs)?;

            for cert in chain.iter() {
                println!("{}\n", cert);
            }
            print_json(&validate_chain(&chain))?;
        }
        Commands::Timestamp { file, hexdump } => {
            let tokens = timestamps(&fs::read(file)?)?;

            if hexdump {
                for hashed in tokens.iter().flatten().filter_map(|t| t.hashed_message.as_ref()) {
                    println!("{}", pretty_hex(hashed));
                }
            } else {
                print_json(&tokens)?;
            }
        }
        Commands::Docmdp { file } => {
            print_json(&extract_docmdp_data(&fs::read(file)?)?)?;
        }
        Commands::Inspect { file } => {
            print_json(&verify::inspect(&fs::read(file)?)?)?;
        }
        Commands::Sign {
            file,
            config,
            pfx,
            password,
            elements,
            text,
            signature_image,
            output,
            dry_run,
        } => {
            let config = SigningConfig::from_source(&JsonConfig::from_path(config)?);
            let request = SignRequest {
                keystore: pfx,
                password,
                elements,
                text,
                signature_image: signature_image.map(visible::load_image).transpose()?,
            };

            let source = FileStore::new(&file);
            let mut pdf = source.read_all()?;

            let signer = JSignPdfSigner::new(&config)?;
            let engine = SignatureEngine::new(config, signer)?;

            if dry_run {
                return print_json(&engine.plan(&mut pdf, &request)?);
            }

            let signed = engine.sign(&pdf, &request)?;
            let target = FileStore::new(output.unwrap_or(file));
            target.write_all(&signed)?;
            info!(output = %target.path().display(), "signed");
        }
        Commands::SignDetached {
            file,
            pfx,
            password,
        } => {
            let target = sign_detached(&file, &fs::read(pfx)?, &password)?;
            println!("{}", target.display());
        }
    }

    Ok(())
}
