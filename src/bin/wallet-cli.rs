use std::path::{Path, PathBuf};

use alloy::primitives::{eip191_hash_message, Address, B256};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use passkey_wallet::account::AddressDeriver;
use passkey_wallet::passkey::parse_attestation;

#[derive(Parser)]
#[command(name = "wallet-cli")]
#[command(about = "Management CLI for the passkey wallet service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show one account
    Account { identity: String },
    /// List registered accounts
    Accounts,
    /// List supported chains
    Chains,
    /// Poll an operation receipt
    Receipt {
        hash: String,
        #[arg(long)]
        chain_id: u64,
    },
    /// Show paymaster configuration
    Paymaster,
    /// Show sponsorship counters
    Stats,
    /// Print the challenge a passkey signs for a message, offline
    MessageHash { message: String },
    /// Compute a counterfactual address from an attestation object, offline
    Derive {
        /// File holding the attestation object (raw CBOR or base64url text)
        attestation: PathBuf,
        #[arg(long)]
        chain_id: u64,
        #[arg(long)]
        factory: Address,
        #[arg(long)]
        init_code_hash: B256,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let path = match cli.command {
        Commands::Account { identity } => format!("/api/account/{}", identity),
        Commands::Accounts => "/api/account/list".to_string(),
        Commands::Chains => "/api/bundler/supported-chains".to_string(),
        Commands::Receipt { hash, chain_id } => {
            format!("/api/bundler/userop/{}?chainId={}", hash, chain_id)
        }
        Commands::Paymaster => "/api/paymaster/config".to_string(),
        Commands::Stats => "/api/paymaster/stats".to_string(),
        Commands::MessageHash { message } => {
            let hash = eip191_hash_message(message.as_bytes());
            let output = json!({
                "hash": hash,
                "challenge": URL_SAFE_NO_PAD.encode(hash),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }
        Commands::Derive {
            attestation,
            chain_id,
            factory,
            init_code_hash,
        } => return derive(&attestation, chain_id, factory, init_code_hash),
    };

    let res = client.get(format!("{}{}", cli.url, path)).send().await?;
    print_response(res).await
}

fn derive(
    attestation: &Path,
    chain_id: u64,
    factory: Address,
    init_code_hash: B256,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::fs::read(attestation)?;
    let object = match std::str::from_utf8(&raw) {
        Ok(text) => URL_SAFE_NO_PAD.decode(text.trim().trim_end_matches('='))?,
        Err(_) => raw,
    };

    let attested = parse_attestation(&object)?;
    let deriver = AddressDeriver::new(factory, init_code_hash);
    let address = deriver.derive(&attested.public_key, chain_id)?;

    let output = json!({
        "address": address,
        "chainId": chain_id,
        "credentialId": URL_SAFE_NO_PAD.encode(&attested.credential_id),
        "algorithm": attested.public_key.algorithm().id(),
        "initCode": deriver.init_code(&attested.public_key, chain_id)?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: wallet API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
