use anyhow::Context;
use clap::Parser;
use std::{
    env::current_dir,
    fs,
    path::PathBuf,
    time::Duration,
};
use streaks::{
    analyzer::{
        DEFAULT_MIN_STREAK_LEN,
        StreakRules,
    },
    app::{
        App,
        RunState,
        actix_query_api::ActixQueryApi,
        http_payout_gateway::HttpPayoutGateway,
        in_memory_payout_gateway::InMemoryPayoutGateway,
        init_tracing,
        ledger::{
            ClaimLedger,
            GuessLedger,
            RoundSettlement,
        },
        payout_gateway::PayoutGateway,
        sled_storage,
    },
    coordinator::ClaimCoordinator,
};
use url::Url;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory of the sled database holding rounds, guesses and claims
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Base url of the wallet service; payouts stay in memory when omitted
    #[arg(short, long)]
    wallet_url: Option<Url>,

    #[arg(long, default_value_t = 10)]
    payout_timeout_secs: u64,

    #[arg(long, default_value_t = DEFAULT_MIN_STREAK_LEN)]
    min_streak: u32,

    #[arg(short, long, default_value = "false")]
    tracing: bool,
}

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

async fn serve<Guesses, Claims, Payouts>(
    coordinator: ClaimCoordinator<Guesses, Claims, Payouts>,
    port: Option<u16>,
) -> anyhow::Result<()>
where
    Guesses: GuessLedger + RoundSettlement,
    Claims: ClaimLedger,
    Payouts: PayoutGateway,
{
    let api = ActixQueryApi::new(port).await?;
    let mut app = App::new(coordinator, api);

    tracing::info!("Starting streak service");
    loop {
        let interrupt = handle_interupt();
        match app.run(interrupt).await? {
            RunState::Continue => continue,
            RunState::Exit => {
                tracing::info!("Exiting streak service");
                return Ok(());
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.tracing {
        init_tracing();
    }
    if args.min_streak == 0 {
        anyhow::bail!("--min-streak must be at least 1");
    }
    let rules = StreakRules {
        min_streak_len: args.min_streak,
    };

    let db_path = match &args.db_path {
        Some(path) => path.clone(),
        None => current_dir()
            .context("determine process working directory")?
            .join("streaks_data"),
    };
    fs::create_dir_all(&db_path)?;
    tracing::info!("Using sled storage directory {}", db_path.display());
    let (guesses, claims) = sled_storage::open(&db_path)?;

    match &args.wallet_url {
        Some(wallet_url) => {
            let payouts = HttpPayoutGateway::new(
                wallet_url,
                Duration::from_secs(args.payout_timeout_secs),
            )?;
            tracing::info!("Paying out through {}", payouts.credit_url());
            serve(ClaimCoordinator::new(guesses, claims, payouts, rules), args.port).await
        }
        None => {
            tracing::warn!("No --wallet-url given; payouts are only kept in memory");
            let payouts = InMemoryPayoutGateway::new();
            serve(ClaimCoordinator::new(guesses, claims, payouts, rules), args.port).await
        }
    }
}
