//! Bridge assignment grader CLI
//!
//! - bridge-grader <student_dir>           -> grade a submission
//! - bridge-grader register <student_dir>  -> register tokens on the student's contracts
//! - bridge-grader status                  -> show chains and test accounts

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use bridge_grader::config::{entries_on_chain, load_contract_info, load_token_list, FileConfig};
use bridge_grader::keys::MINTER_KEY;
use bridge_grader::register::register_and_create;
use bridge_grader::submit::SubmitOptions;
use bridge_grader::{grade, Account, ChainHandle, ChainRole, ContractHandle, GraderConfig, KeyStore, TestAccounts};

#[derive(Parser)]
#[command(name = "bridge-grader")]
#[command(about = "Autograder for the cross-chain bridge assignment", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory containing the student's submission
    student_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a submission (same as passing the directory directly)
    Grade { student_dir: PathBuf },

    /// Register the token list on the submission's bridge contracts
    Register {
        student_dir: PathBuf,

        /// Private key of the contracts' owner
        #[arg(long, env = "BRIDGE_OWNER_PRIVATE_KEY", hide_env_values = true)]
        private_key: Option<String>,
    },

    /// Show chain connectivity and test account balances
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = GraderConfig::from_env()?;

    let command = match (cli.command, cli.student_dir) {
        (Some(command), _) => command,
        (None, Some(student_dir)) => Commands::Grade { student_dir },
        (None, None) => {
            eprintln!("Usage: bridge-grader <student_dir> (see --help)");
            std::process::exit(2);
        }
    };

    match command {
        Commands::Grade { student_dir } => match grade(config, &student_dir).await {
            Ok(report) => {
                report.print_summary();
                println!("{:.2}", report.score);
            }
            Err(e) => {
                tracing::error!("Grading could not start: {:#}", e);
                println!("{:.2}", 0.0);
                std::process::exit(1);
            }
        },

        Commands::Register {
            student_dir,
            private_key,
        } => {
            register(config, &student_dir, private_key.as_deref()).await?;
        }

        Commands::Status => {
            status(config).await?;
        }
    }

    Ok(())
}

async fn register(config: GraderConfig, student_dir: &Path, private_key: Option<&str>) -> Result<()> {
    let owner = match private_key {
        Some(key) => Account::from_private_key(key)?,
        None => {
            tracing::warn!("No owner key given, using the grader's minter key");
            KeyStore::new(&config.files.key_file).account(MINTER_KEY)?
        }
    };

    let info_path = FileConfig::resolve(student_dir, &config.files.contract_info);
    let token_path = FileConfig::resolve(student_dir, &config.files.token_list);
    let tokens = load_token_list(&token_path)?;
    let tokens = entries_on_chain(&tokens, &config.source.name);

    let source_chain = ChainHandle::connect(&config.source).await?;
    let destination_chain = ChainHandle::connect(&config.destination).await?;

    let source = ContractHandle::new(&source_chain, load_contract_info(&info_path, ChainRole::Source)?);
    let destination = ContractHandle::new(
        &destination_chain,
        load_contract_info(&info_path, ChainRole::Destination)?,
    );

    let summary = register_and_create(
        &source_chain,
        &source,
        &destination_chain,
        &destination,
        &owner,
        &tokens,
        &SubmitOptions::from_config(&config.submit),
    )
    .await;

    println!();
    println!("Registered: {}", summary.registered);
    println!("Created:    {}", summary.created);
    println!("Failed:     {}", summary.failed);

    Ok(())
}

async fn status(config: GraderConfig) -> Result<()> {
    let accounts = TestAccounts::load(&KeyStore::new(&config.files.key_file))
        .wrap_err("Failed to load test accounts")?;

    println!();
    println!("Test accounts ({}):", config.files.key_file.display());
    println!("  Minter:   {}", accounts.minter.address());
    println!("  Sender:   {}", accounts.sender.address());
    println!("  Receiver: {}", accounts.receiver.address());

    for chain_config in [&config.source, &config.destination] {
        println!();
        match ChainHandle::connect(chain_config).await {
            Ok(chain) => {
                let block = chain.latest_block().await.unwrap_or_default();
                println!(
                    "  \x1b[32m●\x1b[0m {} ({}): chain id {}, block {}{}",
                    chain.name(),
                    chain.role(),
                    chain.chain_id(),
                    block,
                    if chain.is_poa() { ", proof-of-authority" } else { "" }
                );
                for (label, account) in [
                    ("minter", &accounts.minter),
                    ("sender", &accounts.sender),
                    ("receiver", &accounts.receiver),
                ] {
                    match chain.native_balance(account.address()).await {
                        Ok(balance) => println!("      {:<8} {} wei", label, balance),
                        Err(e) => println!("      {:<8} unavailable: {}", label, e),
                    }
                }
            }
            Err(e) => {
                println!(
                    "  \x1b[31m●\x1b[0m {} ({}): not responding: {}",
                    chain_config.name, chain_config.rpc_url, e
                );
            }
        }
    }
    println!();

    Ok(())
}
