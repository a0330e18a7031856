mod device;
mod global_opts;
mod license;
mod machine_identity;
mod server;
mod tools;
mod ui;

use std::env;

use anyhow::Context as _;
use clap::{Parser, command};
use url::Url;

use global_opts::GlobalOpts;
use license::cache::EntitlementCache;
use license::policy::TierLimits;
use license::validator::{DEFAULT_VALIDATION_ENDPOINT, LicenseValidator as _, RemoteValidator};
use tools::ToolContext;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global_opts: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Serve the tool catalogue over stdio
    Serve,

    /// License management commands
    License(LicenseCommand),
}

#[derive(Debug, clap::Args)]
struct LicenseCommand {
    #[command(subcommand)]
    subcommand: LicenseSubcommands,
}

#[derive(Debug, clap::Subcommand)]
enum LicenseSubcommands {
    /// Show the currently resolved license tier and its limits
    Status,

    /// Validate a license key against the validation service and persist
    /// the entitlement locally
    Activate { key: String },
}

fn setup_logging() {
    use std::io::IsTerminal;
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        fmt,
    };

    let color = std::io::stderr().is_terminal()
        && (match env::var("COLORTERM") {
            Ok(value) => value == "truecolor" || value == "24bit",
            _ => false,
        } || match env::var("TERM") {
            Ok(value) => value == "direct" || value == "truecolor",
            _ => false,
        });

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    // stdout is the protocol channel, all logging goes to stderr.
    let fmt = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    if color {
        fmt.event_format(fmt::format().pretty())
            .with_file(false)
            .with_line_number(false)
            .with_ansi(color)
            .init();
    } else {
        fmt.with_file(false)
            .with_line_number(false)
            .with_ansi(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Cli::parse();

    setup_logging();

    let context = build_context(&opts.global_opts)?;

    match opts.command {
        Commands::Serve => server::serve(context).await?,
        Commands::License(command) => match command.subcommand {
            LicenseSubcommands::Status => license_status(&context).await,
            LicenseSubcommands::Activate { key } => license_activate(&context, &key).await?,
        },
    }

    Ok(())
}

fn build_context(opts: &GlobalOpts) -> anyhow::Result<ToolContext> {
    let endpoint = opts
        .validation_endpoint
        .as_deref()
        .unwrap_or(DEFAULT_VALIDATION_ENDPOINT);
    let endpoint = Url::parse(endpoint)
        .with_context(|| format!("Invalid validation endpoint '{endpoint}'"))?;

    let base_dir = EntitlementCache::default_base_dir()
        .context("Could not determine a home directory for the entitlement cache")?;

    Ok(ToolContext {
        cache: EntitlementCache::new(base_dir, machine_identity::resolve()),
        validator: RemoteValidator::new(endpoint),
        license_key: opts.license_key.clone(),
        adb_path: opts.adb_path.clone(),
    })
}

async fn license_status(context: &ToolContext) {
    let tier = license::resolve_tier(
        &context.cache,
        &context.validator,
        context.license_key.as_deref(),
    )
    .await;
    let limits = TierLimits::for_tier(tier);

    println!("Tier: {tier}");
    println!("Max log lines per request: {}", limits.max_log_lines);
    println!("Max listed devices: {}", limits.max_devices);
}

async fn license_activate(context: &ToolContext, key: &str) -> anyhow::Result<()> {
    match context.validator.validate(key).await {
        Some(record) => {
            let tier = record.tier;
            if let Err(err) = context.cache.save(&record) {
                tracing::warn!(error = %format!("{err:#}"), "Validated but could not persist the entitlement");
            }
            println!("License activated: {tier} tier");
            Ok(())
        }
        None => anyhow::bail!("License validation failed; the key was not activated"),
    }
}
