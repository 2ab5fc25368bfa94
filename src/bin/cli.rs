// EPUB Liberator - ADEPT DRM removal for EPUB books
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use epub_liberator::{inspect, is_protected, DecryptConfig, EpubLiberator};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "epub-liberator-cli")]
#[command(about = "EPUB Liberator CLI - remove Adobe ADEPT DRM from EPUB books", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt a protected book
    Decrypt {
        /// Protected EPUB
        #[arg(short, long)]
        input: PathBuf,
        /// RSA private key (PKCS#1/PKCS#8, DER or PEM)
        #[arg(short, long)]
        key: PathBuf,
        /// Where to write the DRM-free EPUB
        #[arg(short, long)]
        output: PathBuf,
        /// Deflate level for rebuilt entries (0-9)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=9))]
        level: Option<u32>,
        /// Concurrent decode workers
        #[arg(short, long, default_value_t = 1)]
        workers: usize,
        /// Trust the padding byte as-is instead of rejecting values outside 1-16
        #[arg(long)]
        lenient_padding: bool,
    },
    /// Report whether a book carries ADEPT DRM
    Check {
        epub: PathBuf,
    },
    /// List a book's entries and which of them are encrypted
    Inspect {
        epub: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Decrypt {
            input,
            key,
            output,
            level,
            workers,
            lenient_padding,
        } => {
            let key_bytes = tokio::fs::read(&key)
                .await
                .with_context(|| format!("Failed to read key {}", key.display()))?;
            let book = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read book {}", input.display()))?;

            let mut config = DecryptConfig::default().with_workers(workers);
            if let Some(level) = level {
                config = config.with_compression_level(level);
            }
            if lenient_padding {
                config = config.with_lenient_padding();
            }

            let liberator = EpubLiberator::from_key_bytes(&key_bytes, config)?;
            info!(input = %input.display(), "Decrypting");

            let plain = match liberator.decrypt(&book).await {
                Ok(plain) => plain,
                Err(e) => {
                    error!(error = %e, "Decryption failed");
                    let message = e.user_message();
                    return Err(anyhow::Error::new(e).context(message));
                }
            };

            tokio::fs::write(&output, &plain)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote {} ({} bytes)", output.display(), plain.len());
        }
        Commands::Check { epub } => {
            let book = tokio::fs::read(&epub)
                .await
                .with_context(|| format!("Failed to read book {}", epub.display()))?;
            if is_protected(&book)? {
                println!("{}: ADEPT protected", epub.display());
            } else {
                println!("{}: DRM-free", epub.display());
            }
        }
        Commands::Inspect { epub, json } => {
            let book = tokio::fs::read(&epub)
                .await
                .with_context(|| format!("Failed to read book {}", epub.display()))?;
            let report = inspect(&book)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} entries, {} encrypted, {}",
                    report.entries.len(),
                    report.encrypted_count(),
                    if report.protected { "ADEPT protected" } else { "DRM-free" }
                );
                for entry in &report.entries {
                    println!(
                        "{:>10} {:>10} {:<8} {:<9} {}",
                        entry.compressed_size,
                        entry.uncompressed_size,
                        format!("{:?}", entry.method).to_lowercase(),
                        if entry.encrypted { "encrypted" } else { "" },
                        entry.name
                    );
                }
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over `-v` when set
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("epub_liberator={level},epub_liberator_cli={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
