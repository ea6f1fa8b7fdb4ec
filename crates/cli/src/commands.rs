//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;
use storefront_core::{SessionConfig, StateDir};
use storefront_session::{
    Access, Activity, ApiClient, FileTokenStore, GuardDecision, IdentityClient, IdleMonitor,
    IdlePhase, LoginRequest, LogoutReason, ProductQuery, RegisterRequest, RequestPipeline,
    SessionError, SessionEvent, SessionManager, SessionOptions, SessionStatus, StorefrontApi,
    authorize,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "STOREFRONT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign out and revoke the stored refresh token
    Logout,

    /// Create a new account; a confirmation mail follows
    Register {
        #[arg(long)]
        full_name: String,

        #[arg(long)]
        email: String,

        #[arg(long, env = "STOREFRONT_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        address_line1: String,

        #[arg(long)]
        address_line2: Option<String>,

        #[arg(long)]
        city: String,

        #[arg(long)]
        state: String,

        #[arg(long)]
        country: String,

        #[arg(long)]
        zip_code: String,
    },

    /// Confirm an account with the parameters from the confirmation link
    ConfirmEmail {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        token: String,
    },

    /// Show the signed-in user
    Whoami,

    /// Browse the product catalog
    Products {
        /// Free-text search
        #[arg(long)]
        q: Option<String>,

        #[arg(long)]
        brand: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        min_price: Option<f64>,

        #[arg(long)]
        max_price: Option<f64>,

        /// Sort key understood by the storefront (e.g. priceAsc)
        #[arg(long)]
        sort: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 12)]
        page_size: u32,
    },

    /// List orders of the signed-in user
    Orders {
        /// List every order (admin only)
        #[arg(long)]
        all: bool,
    },

    /// Keep the session alive until logout, idle timeout or Ctrl-C
    Watch,

    /// Configuration file operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate a default configuration file
    Init {
        /// Output file path (defaults to <state dir>/config/storefront.json)
        output: Option<PathBuf>,
    },
}

impl Commands {
    pub async fn execute(self, state_dir: StateDir, config_path: Option<PathBuf>) -> Result<()> {
        match self {
            Commands::Config { command } => command.execute(&state_dir),
            command => command.run(&state_dir, config_path).await,
        }
    }

    async fn run(self, state_dir: &StateDir, config_path: Option<PathBuf>) -> Result<()> {
        let config = config::load_config(config_path.as_deref(), state_dir)?;
        let client = Client::connect(&config, state_dir)?;

        match self {
            Commands::Login { email, password } => login(&client, email, password).await,
            Commands::Logout => logout(&client).await,
            Commands::Register {
                full_name,
                email,
                password,
                address_line1,
                address_line2,
                city,
                state,
                country,
                zip_code,
            } => {
                let request = RegisterRequest {
                    full_name,
                    email,
                    password,
                    address_line1,
                    address_line2,
                    city,
                    state,
                    country,
                    zip_code,
                };
                register(&client, &request).await
            }
            Commands::ConfirmEmail { user_id, token } => {
                let message = client
                    .identity
                    .confirm_email(&user_id, &token)
                    .await
                    .context("Email confirmation failed")?;
                println!("{message}");
                Ok(())
            }
            Commands::Whoami => whoami(&client).await,
            Commands::Products {
                q,
                brand,
                category,
                min_price,
                max_price,
                sort,
                page,
                page_size,
            } => {
                let query = ProductQuery {
                    q,
                    brand,
                    category,
                    min_price,
                    max_price,
                    sort,
                    page,
                    page_size,
                };
                products(&client, &query).await
            }
            Commands::Orders { all } => orders(&client, all).await,
            Commands::Watch => watch(&client, &config).await,
            Commands::Config { .. } => Ok(()),
        }
    }
}

impl ConfigCommands {
    pub fn execute(self, state_dir: &StateDir) -> Result<()> {
        match self {
            ConfigCommands::Init { output } => {
                let config_path = output.unwrap_or_else(|| state_dir.config_path());
                config::generate_default_config(&config_path)?;
                println!("Generated configuration at: {}", config_path.display());
                Ok(())
            }
        }
    }
}

/// Session and API handles wired to the configured service
struct Client {
    identity: IdentityClient,
    session: SessionManager,
    storefront: StorefrontApi,
}

impl Client {
    fn connect(config: &SessionConfig, state_dir: &StateDir) -> Result<Self> {
        let api = ApiClient::from_config(config).context("Failed to build HTTP client")?;
        let store = FileTokenStore::new(config.token_path(state_dir));
        debug!(path = %store.path().display(), "Using token file");

        let identity = IdentityClient::new(api.clone());
        let session = SessionManager::new(
            Arc::new(identity.clone()),
            Arc::new(store),
            SessionOptions::from_config(config),
        );
        let storefront = StorefrontApi::new(RequestPipeline::new(api, session.clone()));
        Ok(Self {
            identity,
            session,
            storefront,
        })
    }

    /// Restore the stored session, failing if there is none
    async fn require_session(&self) -> Result<()> {
        if self.session.initialize().await != SessionStatus::Authenticated {
            bail!("Not signed in. Run `storefront login` first.");
        }
        Ok(())
    }
}

async fn login(client: &Client, email: String, password: String) -> Result<()> {
    client
        .session
        .login(LoginRequest::new(email, password))
        .await
        .context("Login failed")?;

    let name = client
        .session
        .get_user()
        .map_or_else(String::new, |user| user.display_name().to_string());
    info!(user = %name, "Signed in");
    println!("Signed in as {name}");
    Ok(())
}

async fn register(client: &Client, request: &RegisterRequest) -> Result<()> {
    match client.identity.register(request).await {
        Ok(message) => {
            info!(email = %request.email, "Account registered");
            println!("{message}");
            Ok(())
        }
        Err(SessionError::InvalidRegistration(errors)) => {
            for error in &errors {
                eprintln!("  --{}: {}", flag_name(error.field), error.message);
            }
            bail!("Registration form has {} invalid field(s)", errors.len())
        }
        Err(e) => Err(e).context("Registration failed"),
    }
}

/// `addressLine1` -> `address-line1`
fn flag_name(field: &str) -> String {
    let mut flag = String::with_capacity(field.len() + 2);
    for c in field.chars() {
        if c.is_ascii_uppercase() {
            flag.push('-');
            flag.push(c.to_ascii_lowercase());
        } else {
            flag.push(c);
        }
    }
    flag
}

async fn logout(client: &Client) -> Result<()> {
    if client.session.initialize().await == SessionStatus::Anonymous {
        println!("Not signed in.");
        return Ok(());
    }
    client.session.logout(false).await;
    println!("Signed out.");
    Ok(())
}

async fn whoami(client: &Client) -> Result<()> {
    client.require_session().await?;
    let state = client.session.state();

    if let Some(user) = state.user() {
        println!("{}", user.display_name());
        if let Some(email) = &user.email {
            println!("  email:   {email}");
        }
        if let Some(city) = &user.city {
            println!("  city:    {city}");
        }
    }
    let roles: Vec<&str> = state.roles().iter().map(String::as_str).collect();
    println!("  roles:   {}", roles.join(", "));
    println!("  admin:   {}", state.is_admin());
    if let Some(expires_at) = state.expires_at() {
        println!("  expires: {expires_at} (unix seconds)");
    }
    Ok(())
}

async fn products(client: &Client, query: &ProductQuery) -> Result<()> {
    // the catalog is public; a stored session only adds the bearer token
    client.session.initialize().await;

    let page = client.storefront.products(query).await?;
    for item in &page.items {
        println!("{}", serde_json::to_string(item)?);
    }
    println!(
        "page {} of {} ({} products)",
        query.page.max(1),
        page.total_pages(query.page_size),
        page.total
    );
    Ok(())
}

async fn orders(client: &Client, all: bool) -> Result<()> {
    client.session.initialize().await;

    let access = if all {
        Access::Admin
    } else {
        Access::Authenticated
    };
    match authorize(&client.session.state(), access) {
        GuardDecision::Allow => {}
        GuardDecision::RedirectToLogin | GuardDecision::Pending => {
            bail!("Not signed in. Run `storefront login` first.")
        }
        GuardDecision::RedirectHome => bail!("Listing all orders requires the Admin role"),
    }

    let orders = if all {
        client.storefront.all_orders().await?
    } else {
        client.storefront.user_orders().await?
    };
    println!("{}", serde_json::to_string_pretty(&orders)?);
    Ok(())
}

async fn watch(client: &Client, config: &SessionConfig) -> Result<()> {
    client.require_session().await?;

    let monitor = IdleMonitor::for_session(
        client.session.clone(),
        config.idle_timeout(),
        config.idle_grace(),
    );
    let mut phase = monitor.subscribe();
    let mut events = client.session.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    println!("Session active. Press Enter to register activity, Ctrl-C to quit.");

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) if monitor.phase() == IdlePhase::Prompting => {
                    monitor.continue_session();
                    println!("Session continued.");
                }
                Ok(Some(_)) => monitor.record(Activity::Key),
                Ok(None) => {
                    debug!("stdin closed, activity input disabled");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
                if *phase.borrow_and_update() == IdlePhase::Prompting {
                    println!(
                        "Still there? Press Enter within {}s to continue your session.",
                        config.idle_grace_secs
                    );
                }
            },
            event = events.recv() => match event {
                Ok(SessionEvent::Refreshed { expires_at }) => {
                    info!(?expires_at, "Access token renewed");
                }
                Ok(SessionEvent::LoggedIn { user }) => {
                    debug!(user = %user.display_name(), "Session re-established");
                }
                Ok(SessionEvent::LoggedOut { reason, .. }) => {
                    let fallback = if reason == LogoutReason::Idle {
                        "Signed out after inactivity."
                    } else {
                        "Signed out."
                    };
                    println!("{}", reason.notice().unwrap_or(fallback));
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving session stored");
                break;
            }
        }
    }

    monitor.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_name_matches_cli_arguments() {
        assert_eq!(flag_name("fullName"), "full-name");
        assert_eq!(flag_name("addressLine1"), "address-line1");
        assert_eq!(flag_name("zipCode"), "zip-code");
        assert_eq!(flag_name("email"), "email");
    }
}
