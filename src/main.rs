use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};

use csrforge::backend::PrivateKeyFactory;
use csrforge::bundle::Bundle;
use csrforge::ca::{CaPolicy, SerialPolicy, load_ca_file};
use csrforge::csr::Generator;
use csrforge::error::CsrForgeError;
use csrforge::issuer::{LocalSigner, SignRequest, SubjectOverride};
use csrforge::key::KeyPair;
use csrforge::request::{CertificateRequest, DefaultValidator};

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Pem,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Generate a key and CSR from a request description and issue a certificate for it",
    long_about = "Generate a key and CSR from a request description and issue a certificate for it.\n\n\
                  Certificates are signed with the CA private key given by --ca-key."
)]
struct Args {
    /// PEM-encoded CA certificate
    ca_cert: PathBuf,

    /// JSON request description, or "-" for standard input
    request: String,

    /// CA private key (PKCS#8, PKCS#1 or SEC1 PEM), used to sign the certificate
    #[arg(long)]
    ca_key: PathBuf,

    /// Lifetime of the issued certificate
    #[arg(long, default_value_t = 365, value_parser = clap::value_parser!(i64).range(1..))]
    days: i64,

    /// Move notBefore this far into the past
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(i64).range(0..))]
    backdate_minutes: i64,

    /// Allow the certificate to outlive the CA
    #[arg(long)]
    no_clamp: bool,

    /// Number certificates 1, 2, 3, ... instead of using random serials
    #[arg(long)]
    sequential_serial: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Pem)]
    format: OutputFormat,

    /// Log more (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn policy(&self) -> CaPolicy {
        CaPolicy::builder()
            .validity_days(self.days)
            .backdate_minutes(self.backdate_minutes)
            .clamp_to_ca_expiry(!self.no_clamp)
            .serial(if self.sequential_serial {
                SerialPolicy::Sequential
            } else {
                SerialPolicy::Random
            })
            .build()
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    match run(&args) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("csrforge: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the whole pipeline and returns the rendered bundle; nothing is printed on failure.
fn run(args: &Args) -> Result<String> {
    let description = read_request(&args.request)?;
    let req = CertificateRequest::from_json(&description)?;
    let generated = Generator::new(DefaultValidator)
        .generate(&req)
        .context("generating key and CSR")?;

    let key_pem = std::fs::read_to_string(&args.ca_key)
        .map_err(|e| CsrForgeError::ReadError(format!("{}: {e}", args.ca_key.display())))?;
    let ca_key = KeyPair::from_pem(&key_pem).context("loading CA private key")?;

    let (ca, backend) = load_ca_file(&args.ca_cert, args.policy(), &PrivateKeyFactory::new(ca_key))
        .context("loading CA")?;
    let cert = LocalSigner::new(ca, backend)
        .sign(&SignRequest {
            request: generated.csr.clone(),
            subject: Some(SubjectOverride::from(&req)),
        })
        .context("issuing certificate")?;

    let bundle = Bundle::assemble(generated.key, generated.csr, cert)?;
    Ok(match args.format {
        OutputFormat::Pem => bundle.to_pem(),
        OutputFormat::Json => format!("{}\n", bundle.to_json()?),
    })
}

fn read_request(source: &str) -> Result<Vec<u8>> {
    if source == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|e| CsrForgeError::ReadError(format!("standard input: {e}")))?;
        return Ok(buf);
    }
    std::fs::read(source).map_err(|e| CsrForgeError::ReadError(format!("{source}: {e}")).into())
}
