//! `sops-decrypt`: binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured JSON logging.
//! 3. Read the encrypted document.
//! 4. Build the [`KeyProvider`] from the configured backends.
//! 5. Decrypt and verify the document.
//! 6. Write the plaintext document to stdout.
//!
//! Decrypt failures exit with the code of the underlying [`DecryptError`].

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use common::document::render_document;
use common::DecryptError;
use tracing::{error, info};

use sops_engine::config::Config;
use sops_engine::telemetry;
use sops_engine::{DecryptionSession, KeyProvider};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<DecryptError>().map_or(1, DecryptError::exit_code);
            error!(error = %format!("{e:#}"), exit_code = code, "decrypt failed");
            eprintln!("ERROR: {e:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        input = %cfg.input_path,
        "sops-decrypt starting"
    );

    // -----------------------------------------------------------------------
    // 3. Input
    // -----------------------------------------------------------------------
    let raw = tokio::fs::read(&cfg.input_path)
        .await
        .with_context(|| format!("failed to read {}", cfg.input_path))?;

    // -----------------------------------------------------------------------
    // 4. Key provider
    // -----------------------------------------------------------------------
    let provider = KeyProvider::from_config(&cfg).await?;

    // -----------------------------------------------------------------------
    // 5. Decrypt
    // -----------------------------------------------------------------------
    let session = DecryptionSession::new(provider, cfg.session_options());
    let doc = session.decrypt_bytes(&raw).await?;
    if !doc.advisories.is_empty() {
        info!(count = doc.advisories.len(), "key-wrapping entries due for rotation");
    }

    // -----------------------------------------------------------------------
    // 6. Output
    // -----------------------------------------------------------------------
    let rendered = render_document(&doc.tree, cfg.output_format())?;
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .and_then(|()| stdout.flush())
        .context("failed to write plaintext to stdout")?;

    info!("document decrypted");
    Ok(())
}
