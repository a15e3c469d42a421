//! Emporia CLI - Lightweight client for the Emporia energy API
//!
//! Logs in once, stores the session tokens, and reuses them for later commands.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emvue::api::{self, VueClient, MAINTENANCE_URL};
use emvue::auth::{AuthConfig, CognitoProvider, Credentials, IdentityProvider};
use emvue::config::{Config, FileTokenSink};
use emvue::models::{Scale, Unit};

#[derive(Parser)]
#[command(name = "emvue")]
#[command(about = "Lightweight CLI client for the Emporia energy API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with username and password and store the session
    Login {
        /// Account email
        #[arg(short, long)]
        username: String,

        /// Account password (not stored)
        #[arg(short, long)]
        password: String,

        /// Log in again even if a session is stored
        #[arg(short, long)]
        force: bool,
    },

    /// Clear the stored session
    Logout,

    /// Show stored session status
    Status,

    /// Show the logged-in user
    Whoami,

    /// Show customer details
    Customer,

    /// List devices and their channels
    Devices,

    /// List linked vehicles and their charge state
    Vehicles,

    /// Show usage for devices (all devices if none given)
    Usage {
        /// Device gids
        gids: Vec<u64>,

        /// Aggregation scale: 1S, 1MIN, 15MIN, 1H, 1D, 1W, 1MON, 1Y
        #[arg(short, long, default_value = "1MIN")]
        scale: Scale,

        /// Unit: kwh, usd, ah, trees, gas, driven, carbon
        #[arg(short, long, default_value = "kwh")]
        unit: Unit,
    },

    /// Turn an outlet on or off
    Outlet {
        /// Outlet device gid
        gid: u64,

        #[arg(long, conflicts_with = "off", required_unless_present = "off")]
        on: bool,

        #[arg(long)]
        off: bool,
    },

    /// Check whether the API is down for maintenance
    Maintenance,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match cli.command {
        Commands::Login {
            username,
            password,
            force,
        } => {
            tracing::info!("Starting authentication flow...");
            login(&config_path, username, password, force).await?;
        }
        Commands::Logout => {
            let mut config = Config::load_from(&config_path)?;
            config.clear_session();
            config.save_to(&config_path)?;
            println!("Logged out.");
        }
        Commands::Status => status(&config_path).await?,
        Commands::Whoami => {
            let client = connect(&config_path).await?;
            let username = client.username().await?;
            let customer = api::get_customer_details(&client).await?;
            println!();
            println!("Email:    {}", username);
            println!("Name:     {} {}", customer.first_name, customer.last_name);
            println!("Customer: {}", customer.customer_gid);
        }
        Commands::Customer => {
            let client = connect(&config_path).await?;
            let customer = api::get_customer_details(&client).await?;
            println!("{}", serde_json::to_string_pretty(&customer)?);
        }
        Commands::Devices => devices(&config_path).await?,
        Commands::Vehicles => vehicles(&config_path).await?,
        Commands::Usage { gids, scale, unit } => usage(&config_path, gids, scale, unit).await?,
        Commands::Outlet { gid, on, off } => {
            let client = connect(&config_path).await?;
            let status = api::get_devices_status(&client).await?;
            let outlet = status
                .outlets
                .iter()
                .find(|o| o.device_gid == gid)
                .with_context(|| format!("No outlet with gid {}", gid))?;
            let updated = api::update_outlet(&client, outlet, Some(on && !off)).await?;
            println!(
                "Outlet {} is now {}",
                updated.device_gid,
                if updated.outlet_on { "on" } else { "off" }
            );
        }
        Commands::Maintenance => {
            let options = Config::load_from(&config_path)?.client_options();
            let http = reqwest::Client::builder()
                .connect_timeout(options.connect_timeout)
                .timeout(options.connect_timeout + options.read_timeout)
                .build()?;
            match api::down_for_maintenance(&http, MAINTENANCE_URL).await? {
                Some(msg) => println!("Down for maintenance: {}", msg),
                None => println!("No maintenance notice."),
            }
        }
    }

    Ok(())
}

fn build_client(config: &Config) -> Result<VueClient> {
    let provider: Arc<dyn IdentityProvider> =
        Arc::new(CognitoProvider::new(AuthConfig::default()));
    let validator = config.token_validator(provider.clone());
    Ok(VueClient::new(config.client_options(), provider)?.with_validator(validator))
}

/// Resume the stored session.
async fn connect(config_path: &Path) -> Result<VueClient> {
    let config = Config::load_from(config_path)?;
    let Some(stored) = config.stored_session().cloned() else {
        bail!("Not logged in. Run 'emvue login'.");
    };

    let client = build_client(&config)?;
    client
        .authenticate(
            Credentials::tokens(stored.tokens, stored.username),
            Some(Box::new(FileTokenSink::new(config_path))),
        )
        .await
        .context("Could not resume stored session")?;
    Ok(client)
}

async fn login(config_path: &Path, username: String, password: String, force: bool) -> Result<()> {
    let config = Config::load_from(config_path)?;
    if !force {
        if let Some(stored) = config.stored_session() {
            println!(
                "Already logged in as {}. Use --force to re-authenticate.",
                stored.username.as_deref().unwrap_or("(unknown)")
            );
            return Ok(());
        }
    }

    let client = build_client(&config)?;
    client
        .authenticate(
            Credentials::password(username, password),
            Some(Box::new(FileTokenSink::new(config_path))),
        )
        .await
        .context("Login failed")?;

    let username = client.username().await?;
    let customer = api::get_customer_details(&client).await?;
    println!(
        "Login successful: {} (customer {}).",
        username, customer.customer_gid
    );
    Ok(())
}

async fn status(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;
    let Some(stored) = config.stored_session() else {
        println!("Session:  none");
        println!("\nRun 'emvue login' to authenticate.");
        return Ok(());
    };
    println!(
        "Username: {}",
        stored.username.as_deref().unwrap_or("(unknown)")
    );

    let client = connect(config_path).await?;
    let claims = client.claims().await?;
    let state = if claims.is_expired_at(chrono::Utc::now()) {
        "expired (renewed on next call)"
    } else {
        "valid"
    };
    println!("Session:  {}", state);
    println!("  expires_at: {}", claims.expiry);
    println!("  issuer:     {}", claims.issuer);
    Ok(())
}

async fn devices(config_path: &Path) -> Result<()> {
    let client = connect(config_path).await?;
    let devices = api::get_devices(&client).await?;

    for device in &devices.devices {
        println!(
            "{} {} {} ({})",
            device.device_gid,
            device.model,
            device.display_name(),
            device.firmware
        );
        for channel in &device.channels {
            println!(
                "\t{} {} x{}",
                channel.channel_num,
                channel.name.as_deref().unwrap_or("-"),
                channel.channel_multiplier
            );
        }
    }
    Ok(())
}

async fn vehicles(config_path: &Path) -> Result<()> {
    let client = connect(config_path).await?;
    let vehicles = api::get_vehicles(&client).await?;
    if vehicles.is_empty() {
        println!("No vehicles linked.");
        return Ok(());
    }

    for vehicle in &vehicles {
        println!(
            "{} {} {} {} ({})",
            vehicle.vehicle_gid, vehicle.year, vehicle.make, vehicle.model, vehicle.display_name
        );
        match api::get_vehicle_status(&client, vehicle.vehicle_gid).await? {
            Some(status) => println!(
                "\t{} {:.0}% {}",
                status.vehicle_state, status.battery_level, status.charging_state
            ),
            None => println!("\t(no status)"),
        }
    }
    Ok(())
}

async fn usage(config_path: &Path, gids: Vec<u64>, scale: Scale, unit: Unit) -> Result<()> {
    let client = connect(config_path).await?;
    let gids = if gids.is_empty() {
        api::get_devices(&client)
            .await?
            .devices
            .iter()
            .map(|d| d.device_gid)
            .collect()
    } else {
        gids
    };
    if gids.is_empty() {
        bail!("No devices on this account.");
    }

    let snapshot = api::get_device_list_usage(&client, &gids, None, scale, unit).await?;
    for (gid, device) in &snapshot.devices {
        for (channel_num, reading) in &device.channels {
            let usage = match reading.usage {
                Some(value) => format!("{:.4} {}", value, unit),
                None => "(no data)".to_string(),
            };
            println!(
                "{} {} {} {}",
                gid,
                channel_num,
                reading.name.as_deref().unwrap_or("-"),
                usage
            );
        }
    }
    for gid in &snapshot.missing {
        eprintln!("Warning: device {} reported no usage.", gid);
    }
    if !snapshot.is_complete() {
        eprintln!("Warning: some channels reported no data.");
    }
    Ok(())
}
