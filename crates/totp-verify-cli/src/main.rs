//! Verification CLI — a thin wiring layer over the File-backed storage
//! variants, mirroring the init pattern the rest of this codebase uses for
//! its own binary entry points.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use totp_verify_backends::{
    FilePincodeBackend, FilePincodeBackendConfig, FileSecretBackend, FileSecretBackendConfig,
    FileStateBackend, FileStateBackendConfig,
};
use totp_verify_core::Authenticator;

#[derive(Parser)]
#[command(name = "totp-verify")]
#[command(about = "Verify a TOTP/pincode/scratch-code credential against flat-file storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a submitted credential for a user
    Verify {
        /// Username to verify
        username: String,
        /// Submitted credential (pincode + token, or bare token)
        credential: String,
        /// Directory holding <username>.totp secret files
        #[arg(long, default_value = "/etc/totp-verify/secrets")]
        secrets_dir: PathBuf,
        /// Flat pincodes file (omit to run without pincode verification)
        #[arg(long)]
        pincode_file: Option<PathBuf>,
        /// Directory holding per-user state files
        #[arg(long, default_value = "/var/lib/totp-verify/state")]
        state_dir: PathBuf,
        /// Reject any credential that doesn't carry a pincode prefix
        #[arg(long)]
        require_pincode: bool,
    },
    /// Rebuild the `pincodes.db` sidecar from the flat `pincodes` file
    RebuildPincodeDb {
        #[arg(long)]
        pincode_file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "totp_verify=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify {
            username,
            credential,
            secrets_dir,
            pincode_file,
            state_dir,
            require_pincode,
        } => {
            let secret_backend = Box::new(FileSecretBackend::new(FileSecretBackendConfig {
                secrets_dir,
            }));
            let state_backend = Box::new(FileStateBackend::new(FileStateBackendConfig { state_dir }));

            let mut authenticator = Authenticator::new(secret_backend, state_backend)
                .with_require_pincode(require_pincode);

            if let Some(pincode_file) = pincode_file {
                let pincode_backend =
                    Box::new(FilePincodeBackend::new(FilePincodeBackendConfig { pincode_file }));
                authenticator = authenticator.with_pincode_backend(pincode_backend);
            }

            match authenticator.verify_user_token(&username, &credential) {
                Ok(message) => {
                    tracing::info!(%username, %message, "verification succeeded");
                    println!("{message}");
                }
                Err(e) => {
                    tracing::warn!(%username, error = %e, "verification failed");
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::RebuildPincodeDb { pincode_file } => {
            let backend = FilePincodeBackend::new(FilePincodeBackendConfig { pincode_file });
            backend.rebuild_db()?;
            println!("pincodes.db rebuilt");
        }
    }

    Ok(())
}
