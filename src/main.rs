use std::{net::TcpListener, path::PathBuf, process, sync::Arc};

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};

use gro_sale::{
    rpc::{self, Call, ClientError, Response, RpcClient},
    Address, ConfigError, SaleConfig, SaleEngine, SaleService, SaleStore, StoreError,
};

#[derive(Parser)]
#[command(name = "gro", version, about = "GRO token ledger and sale engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh state file.
    Init {
        #[arg(long, env = "GRO_STATE")]
        state: PathBuf,
        #[command(flatten)]
        sale: SaleArgs,
        /// Overwrite an existing state file.
        #[arg(long)]
        force: bool,
    },
    /// Serve calls over TCP, creating the state file on first start.
    Serve {
        #[arg(long, env = "GRO_STATE")]
        state: PathBuf,
        #[arg(long, env = "GRO_BIND", default_value = "127.0.0.1:7545")]
        bind: String,
        #[command(flatten)]
        sale: SaleArgs,
    },
    /// Send one call to a running server, e.g. '{"method":"totalSupply"}'.
    Call {
        #[arg(long, env = "GRO_ENDPOINT", default_value = "127.0.0.1:7545")]
        to: String,
        #[arg(long)]
        caller: Option<Address>,
        call: String,
    },
    /// Verify a state file and print a summary.
    Inspect {
        #[arg(long, env = "GRO_STATE")]
        state: PathBuf,
    },
    /// Print the character firstDigit picks from INPUT.
    FirstDigit { input: String },
}

#[derive(Args)]
struct SaleArgs {
    /// JSON sale configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "GRO_FUND_WALLET")]
    fund_wallet: Option<Address>,
    #[arg(long)]
    control_wallet: Option<Address>,
}

impl SaleArgs {
    fn resolve(&self) -> Result<SaleConfig, CliError> {
        let mut config = match (&self.config, self.fund_wallet) {
            (Some(path), _) => SaleConfig::from_file(path)?,
            (None, Some(fund_wallet)) => SaleConfig::new(fund_wallet),
            (None, None) => return Err(CliError::Usage("--fund-wallet or --config is required")),
        };
        if let Some(fund_wallet) = self.fund_wallet {
            config.fund_wallet = fund_wallet;
        }
        if self.control_wallet.is_some() {
            config.control_wallet = self.control_wallet;
        }
        config.validate()?;
        Ok(config)
    }

    /// Flags that were passed on the command line or environment.
    fn given(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.config.is_some() {
            flags.push("--config");
        }
        if self.fund_wallet.is_some() {
            flags.push("--fund-wallet");
        }
        if self.control_wallet.is_some() {
            flags.push("--control-wallet");
        }
        flags
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//==================== commands ====================//

fn init_cmd(state: PathBuf, sale: &SaleArgs, force: bool) -> Result<(), CliError> {
    let store = SaleStore::new(state);
    if store.exists() && !force {
        return Err(CliError::Usage("state file exists, pass --force to overwrite"));
    }
    let config = sale.resolve()?;
    store.save(&SaleEngine::new(&config))?;
    println!("initialized → {}", store.path().display());
    Ok(())
}

fn serve_cmd(state: PathBuf, bind: &str, sale: &SaleArgs) -> Result<(), CliError> {
    let store = SaleStore::new(state);
    let service = if store.exists() {
        info!("resuming from {}", store.path().display());
        let ignored = sale.given();
        if !ignored.is_empty() {
            warn!(
                "{} ignored: the sale parameters come from the existing state file",
                ignored.join(", ")
            );
        }
        let engine = store.load()?;
        SaleService::with_store(engine, store)
    } else {
        let config = sale.resolve()?;
        info!("starting a new sale in {}", store.path().display());
        SaleService::open(store, || SaleEngine::new(&config))?
    };
    let listener = TcpListener::bind(bind)?;
    rpc::serve(listener, Arc::new(service))?;
    Ok(())
}

fn call_cmd(to: &str, caller: Option<Address>, call: &str) -> Result<bool, CliError> {
    let call: Call = serde_json::from_str(call)?;
    let mut client = RpcClient::connect(to)?;
    let response = client.send(&rpc::Request { caller, call })?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(matches!(response, Response::Ok(_)))
}

fn inspect_cmd(state: PathBuf) -> Result<(), CliError> {
    let store = SaleStore::new(state);
    let engine = store.load()?;
    let snapshot = engine.snapshot();
    let params = engine.params();
    println!("state         : {}", store.path().display());
    println!("height        : {}", snapshot.ledger.meta.height);
    println!("merkle root   : {}", hex::encode(snapshot.ledger.merkle_root));
    println!("fund wallet   : {}", params.fund_wallet);
    match params.control_wallet {
        Some(control) => println!("control wallet: {control}"),
        None => println!("control wallet: -"),
    }
    match params.vesting_contract {
        Some(vesting) => println!("vesting       : {vesting}"),
        None => println!("vesting       : -"),
    }
    println!("price         : {}", params.current_price);
    println!("min amount    : {} wei", params.min_amount);
    println!("supply / cap  : {} / {}", engine.total_supply(), engine.token_cap());
    println!("accounts      : {}", snapshot.ledger.accounts.len());
    println!("whitelisted   : {}", snapshot.whitelist.len());
    println!("allocations   : {}", snapshot.allocations.len());
    println!("pending w/d   : {}", snapshot.withdrawals.len());
    println!("liquidity     : {} wei", engine.liquidity());
    Ok(())
}

//==================== main ====================//

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Init { state, sale, force } => init_cmd(state, &sale, force),
        Command::Serve { state, bind, sale } => serve_cmd(state, &bind, &sale),
        Command::Call { to, caller, call } => match call_cmd(&to, caller, &call) {
            Ok(true) => Ok(()),
            Ok(false) => process::exit(1),
            Err(err) => Err(err),
        },
        Command::Inspect { state } => inspect_cmd(state),
        Command::FirstDigit { input } => {
            match gro_sale::first_digit(&input) {
                Some(digit) => println!("{digit}"),
                None => println!("-"),
            }
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("{err}");
        process::exit(2);
    }
}
