use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use esports_wiki_scraper::{
    is_known_game, print_json, print_matches, print_players, print_teams, print_tournament,
    print_tournaments, Aggregator, Config, CsvSink, RunOutcome, SyncJob, TournamentLookup,
};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "esports_wiki_scraper")]
#[command(about = "Fetch esports teams, players, matches and tournaments from the wiki API")]
struct Cli {
    /// TOML config file (defaults to ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List teams
    Teams(ListArgs),
    /// List players
    Players(ListArgs),
    /// List tournaments, newest first
    Tournaments(ListArgs),
    /// Recent and upcoming matches
    Matches(ListArgs),
    /// Full report for one tournament
    Tournament {
        /// Tournament name as you would type it
        name: String,
        #[arg(short, long)]
        game: String,
        #[arg(long)]
        json: bool,
    },
    /// Fetch one kind of record and store it as CSV
    Sync {
        kind: SyncArg,
        #[arg(short, long)]
        game: String,
        /// Tournament name, required for `sync tournament`
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long, default_value = "data")]
        out: PathBuf,
    },
    /// Re-run every list sync on a fixed interval
    Watch {
        #[arg(short, long)]
        game: String,
        #[arg(long, default_value_t = 60)]
        every_minutes: u64,
        #[arg(short, long, default_value = "data")]
        out: PathBuf,
    },
}

#[derive(clap::Args)]
struct ListArgs {
    #[arg(short, long)]
    game: String,
    #[arg(short, long)]
    limit: Option<usize>,
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncArg {
    Teams,
    Players,
    Tournaments,
    Matches,
    Tournament,
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> esports_wiki_scraper::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let aggregator = Aggregator::from_config(&config)?;

    match cli.command {
        Command::Teams(args) => {
            warn_unknown_game(&args.game);
            let teams = aggregator.fetch_teams(&args.game, args.limit).await;
            if args.json {
                print_json(&teams)?
            } else {
                print_teams(&teams)
            }
        }
        Command::Players(args) => {
            warn_unknown_game(&args.game);
            let players = aggregator.fetch_players(&args.game, args.limit).await;
            if args.json {
                print_json(&players)?
            } else {
                print_players(&players)
            }
        }
        Command::Tournaments(args) => {
            warn_unknown_game(&args.game);
            let tournaments = aggregator.fetch_tournaments(&args.game, args.limit).await;
            if args.json {
                print_json(&tournaments)?
            } else {
                print_tournaments(&tournaments)
            }
        }
        Command::Matches(args) => {
            warn_unknown_game(&args.game);
            let matches = aggregator.fetch_recent_matches(&args.game, args.limit).await;
            if args.json {
                print_json(&matches)?
            } else {
                print_matches(&matches)
            }
        }
        Command::Tournament { name, game, json } => {
            warn_unknown_game(&game);
            match aggregator.fetch_tournament_by_name(&name, &game).await {
                TournamentLookup::Found(record) if json => print_json(&*record)?,
                TournamentLookup::Found(record) => print_tournament(&record),
                TournamentLookup::NotFound { query } => {
                    println!("No tournament found for '{}'", query)
                }
                TournamentLookup::Failed { query, error } => {
                    eprintln!("Could not fetch '{}': {}", query, error)
                }
            }
        }
        Command::Sync { kind, game, name, limit, out } => {
            let job = match (kind, name) {
                (SyncArg::Teams, _) => SyncJob::Teams,
                (SyncArg::Players, _) => SyncJob::Players,
                (SyncArg::Tournaments, _) => SyncJob::Tournaments,
                (SyncArg::Matches, _) => SyncJob::Matches,
                (SyncArg::Tournament, Some(name)) => SyncJob::Tournament { name },
                (SyncArg::Tournament, None) => {
                    eprintln!("`sync tournament` needs --name");
                    return Ok(());
                }
            };
            let mut sink = CsvSink::open(out)?;
            report(aggregator.sync(&job, &game, limit, &mut sink).await);
        }
        Command::Watch { game, every_minutes, out } => {
            let mut sink = CsvSink::open(out)?;
            let every = Duration::from_secs(every_minutes.max(1) * 60);
            log::info!(
                "Syncing {} every {} minutes into {}",
                game,
                every_minutes,
                sink.dir().display()
            );
            let jobs = [SyncJob::Teams, SyncJob::Players, SyncJob::Tournaments, SyncJob::Matches];
            loop {
                for job in &jobs {
                    report(aggregator.sync(job, &game, None, &mut sink).await);
                }
                tokio::time::sleep(every).await;
            }
        }
    }
    Ok(())
}

fn report(outcome: RunOutcome<esports_wiki_scraper::SyncLogEntry>) {
    match outcome {
        RunOutcome::Completed(entry) => println!(
            "{} sync for {}: {} ({} records){}",
            entry.kind,
            entry.game,
            entry.status.as_str(),
            entry.count,
            entry.error.map(|e| format!(" - {}", e)).unwrap_or_default()
        ),
        RunOutcome::AlreadyRunning => println!("Sync already running, skipped"),
    }
}

fn warn_unknown_game(game: &str) {
    if !is_known_game(game) {
        log::warn!("'{}' is not a known wiki path, requests may fail", game);
    }
}
