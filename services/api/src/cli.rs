use crate::demo::{run_demo, DemoArgs};
use crate::infra::{build_service, parse_datetime};
use crate::server;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use hiss::config::AppConfig;
use hiss::error::AppError;
use hiss::workflows::registration::{NewWave, User, UserId};

#[derive(Parser, Debug)]
#[command(
    name = "hiss",
    about = "Run and administer the hackathon registration service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Manage admission waves
    Wave {
        #[command(subcommand)]
        command: WaveCommand,
    },
    /// Manage applicant accounts
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Walk an in-memory cohort through the whole application lifecycle
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum WaveCommand {
    /// Open a new admission wave
    Create(WaveCreateArgs),
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Create or update the account an application is filed under
    Add(UserAddArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override DATABASE_URL
    #[arg(long)]
    pub(crate) database_url: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct WaveCreateArgs {
    /// Display name of the wave
    #[arg(long)]
    pub(crate) name: String,
    /// Opening instant (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_datetime)]
    pub(crate) start: DateTime<Utc>,
    /// Closing instant, exclusive (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_datetime)]
    pub(crate) end: DateTime<Utc>,
    /// Days admitted applicants have to confirm
    #[arg(long, default_value_t = 5)]
    pub(crate) rsvp_days: u32,
    /// Mark the wave as a walk-in wave
    #[arg(long)]
    pub(crate) walk_in: bool,
    /// Override DATABASE_URL
    #[arg(long)]
    pub(crate) database_url: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct UserAddArgs {
    /// Identifier sent by the authenticating proxy in the x-user-id header
    #[arg(long)]
    pub(crate) id: String,
    #[arg(long)]
    pub(crate) email: String,
    /// Team the applicant registered with
    #[arg(long)]
    pub(crate) team: Option<String>,
    #[arg(long)]
    pub(crate) staff: bool,
    /// Override DATABASE_URL
    #[arg(long)]
    pub(crate) database_url: Option<String>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Wave {
            command: WaveCommand::Create(args),
        } => create_wave(args).await,
        Command::User {
            command: UserCommand::Add(args),
        } => add_user(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}

fn load_config(database_url: Option<String>) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(url) = database_url {
        config.database.url = url;
    }
    Ok(config)
}

async fn create_wave(args: WaveCreateArgs) -> Result<(), AppError> {
    let WaveCreateArgs {
        name,
        start,
        end,
        rsvp_days,
        walk_in,
        database_url,
    } = args;
    let config = load_config(database_url)?;
    let service = build_service(&config).await?;

    let wave = service
        .create_wave(NewWave {
            name,
            start,
            end,
            num_days_to_rsvp: rsvp_days,
            is_walk_in_wave: walk_in,
        })
        .await?;

    println!("Created wave {} ({})", wave.name, wave.id.0);
    println!("  open:   {}", wave.start.to_rfc3339());
    println!("  close:  {}", wave.end.to_rfc3339());
    println!("  rsvp:   {} day(s) after admission", wave.num_days_to_rsvp);
    if wave.is_walk_in_wave {
        println!("  walk-in wave");
    }
    Ok(())
}

async fn add_user(args: UserAddArgs) -> Result<(), AppError> {
    let UserAddArgs {
        id,
        email,
        team,
        staff,
        database_url,
    } = args;
    let config = load_config(database_url)?;
    let service = build_service(&config).await?;

    let user = service
        .register_user(User {
            id: UserId(id),
            email,
            team_name: team,
            is_staff: staff,
        })
        .await?;

    println!(
        "Saved user {} <{}>{}",
        user.id.0,
        user.email,
        if user.is_staff { " [staff]" } else { "" }
    );
    Ok(())
}
