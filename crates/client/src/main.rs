use anyhow::Result;
use clap::{Parser, Subcommand};
use famcare::config::Config;
use famcare::remote::{self, MemoryBackend, RemoteClient};
use famcare::store::FamilyStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod records;

use records::{AppointmentAction, MedAction, MemberAction, VaccineAction};

#[derive(Parser)]
#[command(name = "famcare")]
#[command(about = "Family medical records: members, medications, vaccines and appointments")]
#[command(version = env!("FAMCARE_VERSION"))]
struct Cli {
    /// Use a local backend stored in a file instead of the hosted service
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an administrator account
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign in with email and password, or with an emailed link
    Login {
        #[arg(required_unless_present = "link")]
        email: Option<String>,
        #[arg(long, conflicts_with_all = ["magic_link", "link"])]
        password: Option<String>,
        /// Email a one-time sign-in link instead of asking for a password
        #[arg(long)]
        magic_link: bool,
        /// Finish signing in with the link from that email
        #[arg(long, conflicts_with = "magic_link")]
        link: Option<String>,
    },
    /// Sign out
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Email a password recovery link
    ForgotPassword { email: String },
    /// Set a new password from a recovery link
    Recover {
        /// The full link from the recovery email
        link: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        confirm: Option<String>,
    },
    /// List family members with their medications and vaccines
    Members,
    /// Manage family members
    Member {
        #[command(subcommand)]
        action: MemberAction,
    },
    /// Manage a member's medications
    Med {
        #[command(subcommand)]
        action: MedAction,
    },
    /// Manage a member's vaccines
    Vaccine {
        #[command(subcommand)]
        action: VaccineAction,
    },
    /// List appointments
    Appointments,
    /// Manage appointments
    Appointment {
        #[command(subcommand)]
        action: AppointmentAction,
    },
    /// Dashboard overview
    Summary,
    /// Clinical history of one member
    History {
        /// Member id or name
        member: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (backend_url, anon_key, app_url, recovery_timeout_secs, persist_session)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },
    /// Show all configuration
    Show,
    /// Get the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "famcare=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config { action } => return handle_config_command(action),
        other => other,
    };

    let config = Config::load()?;
    let remote = connect(&config, cli.offline)?;

    // Recovery runs without the store: nothing is loaded for a recovery session.
    let command = match command {
        Commands::Recover {
            link,
            password,
            confirm,
        } => return auth::recover(remote, &config, link, password, confirm).await,
        other => other,
    };

    let store = FamilyStore::new(remote);
    store.start().await;
    let today = chrono::Local::now().date_naive();

    let result = match command {
        Commands::Register {
            first_name,
            last_name,
            email,
            password,
        } => auth::register(&store, first_name, last_name, email, password).await,
        Commands::Login {
            email,
            password,
            magic_link,
            link,
        } => match (link, email) {
            (Some(link), _) => auth::login_with_link(&store, &link).await,
            (None, Some(email)) if magic_link => {
                auth::send_magic_link(&store, &config, email, cli.offline).await
            }
            (None, Some(email)) => auth::login(&store, email, password).await,
            (None, None) => Err(anyhow::anyhow!("An email address is required")),
        },
        Commands::Logout => auth::logout(&store).await,
        Commands::Whoami => auth::whoami(&store).await,
        Commands::ForgotPassword { email } => {
            auth::forgot_password(&store, &config, email, cli.offline).await
        }
        Commands::Members => records::list_members(&store),
        Commands::Member { action } => records::member(&store, action).await,
        Commands::Med { action } => records::medication(&store, action).await,
        Commands::Vaccine { action } => records::vaccine(&store, action).await,
        Commands::Appointments => records::list_appointments(&store),
        Commands::Appointment { action } => records::appointment(&store, action).await,
        Commands::Summary => records::summary(&store, today),
        Commands::History { member } => records::history(&store, &member, today),
        Commands::Config { .. } | Commands::Recover { .. } => Ok(()),
    };

    store.shutdown();
    result
}

fn connect(config: &Config, offline: bool) -> Result<Arc<dyn RemoteClient>> {
    if offline {
        let path = config.offline_file()?;
        tracing::info!(path = %path.display(), "Using offline backend");
        return Ok(Arc::new(MemoryBackend::open(path)?));
    }
    Ok(remote::connect(config))
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            let path = Config::config_path()?;
            let mut config = if path.exists() {
                Config::load_from_path(&path)?
            } else {
                Config::default()
            };
            match key.as_str() {
                "backend_url" => config.backend.url = Some(value),
                "anon_key" => config.backend.anon_key = Some(value),
                "app_url" => config.app.url = value,
                "recovery_timeout_secs" => config.app.recovery_timeout_secs = value.parse()?,
                "persist_session" => config.app.persist_session = value.parse()?,
                _ => anyhow::bail!(
                    "Unknown config key: {}. Valid keys: backend_url, anon_key, app_url, recovery_timeout_secs, persist_session",
                    key
                ),
            }
            config.save_to_path(&path)?;
            println!("Configuration saved");
        }
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = match key.as_str() {
                "backend_url" => config.backend.url.unwrap_or_default(),
                "anon_key" => config.backend.anon_key.map(|_| "****").unwrap_or_default().to_string(),
                "app_url" => config.app.url,
                "recovery_timeout_secs" => config.app.recovery_timeout_secs.to_string(),
                "persist_session" => config.app.persist_session.to_string(),
                _ => anyhow::bail!("Unknown config key: {}", key),
            };
            println!("{}", value);
        }
        ConfigAction::Show => {
            let config = Config::load()?;
            println!("backend_url: {}", config.backend.url.clone().unwrap_or_default());
            println!("anon_key: {}", config.backend.anon_key.as_ref().map(|_| "****").unwrap_or_default());
            println!("app_url: {}", config.app.url);
            println!("recovery_timeout_secs: {}", config.app.recovery_timeout_secs);
            println!("persist_session: {}", config.app.persist_session);
            if let Some(path) = config.session_file() {
                println!("session_file: {}", path.display());
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
