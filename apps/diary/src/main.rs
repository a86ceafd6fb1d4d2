use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{
    DiaryController, FheClient, HttpFheClient, HttpGateway, LocalSigner, OperationStatus,
    SessionCollaborators, SessionState, WalletSigner,
};
use shared::domain::ChainId;
use storage::Storage;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Profile, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(name = "diary", about = "Encrypted mood diary client")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long, default_value = "default")]
    profile: String,
    #[arg(long)]
    chain_id: Option<u64>,
    /// Sign without asking for confirmation.
    #[arg(long)]
    yes: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show entry count and trend handles.
    Stats,
    /// Encrypt and store a mood score from 1 to 5.
    Submit {
        #[arg(allow_negative_numbers = true)]
        score: f64,
    },
    /// Ask the diary to share the encrypted average with this wallet.
    RequestAccess,
    /// Decrypt the shared average locally.
    Decrypt,
    /// Create the profile wallet if needed and print its address.
    Keygen,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(&cli.config)?;
    if let Some(chain_id) = cli.chain_id {
        settings.chain_id = ChainId(chain_id);
    }
    let profile = Profile::resolve(&settings, &cli.profile)?;
    let signer = LocalSigner::load_or_create(&profile.wallet_key_path)?;

    if matches!(cli.command, Command::Keygen) {
        println!("address: {}", signer.address());
        println!("key file: {}", profile.wallet_key_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let signer = if cli.yes {
        signer
    } else {
        signer.with_approval(confirm_on_stdin)
    };
    let wallet_address = signer.address();
    let storage = Storage::new(&profile.database_url()).await?;
    let gateway = HttpGateway::new(
        &settings.gateway_url,
        settings.chain_id,
        settings.gateway_options(),
    )?;
    let fhe: Option<Arc<dyn FheClient>> = match HttpFheClient::connect(gateway.clone()).await {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            warn!("diary: FHE client unavailable err={err}");
            None
        }
    };

    let collaborators = SessionCollaborators {
        provider: Some(Arc::new(gateway)),
        signer: Some(Arc::new(signer)),
        fhe,
        storage: Arc::new(storage),
        wallet_address: Some(wallet_address),
    };
    let mut controller = DiaryController::new(collaborators, settings.chain_directory()?, None);
    let mut state = SessionState::default();
    controller
        .change_chain(&mut state, Some(settings.chain_id))
        .await;

    if controller.is_deploying() {
        println!(
            "No diary deployed on chain {}. Deploy one or add it to the deployments file.",
            settings.chain_id
        );
        return Ok(ExitCode::FAILURE);
    }

    let status = match cli.command {
        Command::Stats => state.refresh,
        Command::Submit { score } => {
            controller.submit_mood(&mut state, score).await;
            state.submit
        }
        Command::RequestAccess => {
            controller.request_trend_handle(&mut state).await;
            state.request_access
        }
        Command::Decrypt => {
            controller.decrypt_trend(&mut state).await;
            state.decrypt
        }
        Command::Keygen => OperationStatus::Succeeded,
    };

    print_state(&controller, &state, wallet_address);
    Ok(if status == OperationStatus::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_state(controller: &DiaryController, state: &SessionState, wallet: shared::domain::Address) {
    if !state.message.is_empty() {
        println!("{}", state.message);
    }
    if let Some(address) = controller.contract_address() {
        println!("diary:          {address}");
    }
    println!("wallet:         {wallet}");
    println!("entries:        {}", state.entry_count);
    match state.network_trend_handle {
        Some(handle) => println!("network trend:  {handle}"),
        None => println!("network trend:  -"),
    }
    match state.my_trend_handle {
        Some(handle) if !handle.is_zero() => println!("your trend:     {handle}"),
        _ => println!("your trend:     not shared (run `diary request-access`)"),
    }
    if let Some(trend) = state.clear_trend {
        println!(
            "average mood:   {} ({})",
            trend.value,
            trend.value.tone()
        );
    }
}

fn confirm_on_stdin(message: &[u8]) -> bool {
    let purpose = message
        .split(|byte| *byte == b'\n')
        .next()
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    eprint!("Sign {purpose} request with your diary wallet? [y/N] ");
    if io::stderr().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
