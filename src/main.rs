//! plugdeck - plugin host with a package store and a minute-aligned
//! automation engine.
//!
//! Usage:
//!   plugdeck list                          List discovered plugins
//!   plugdeck install <ARCHIVE>             Install a plugin archive
//!   plugdeck install --index <PACKAGE>     Install a plugin from the package index
//!   plugdeck call <PLUGIN> <FN> [ARGS]     Call a plugin function
//!   plugdeck packages [list|remove|prune]  Inspect the package store
//!   plugdeck automation <SUBCOMMAND>       Manage automation items
//!   plugdeck serve                         Run plugins and the scheduler until Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use plugdeck_automation::{AutomationEngine, AutomationItem, RunReport, scheduler};
use plugdeck_core::{HostConfig, JsonFileStore, KvStore, Value};
use plugdeck_plugin::{HostContext, PluginDescriptor, PluginManager};

#[derive(Parser)]
#[command(
    name = "plugdeck",
    version,
    about = "Plugin host and automation runner",
    long_about = "plugdeck discovers plugins, links their packages from a shared \
                  store, and fires automation items on a minute-aligned schedule.\n\n\
                  Run `plugdeck serve` to keep plugins and automations running."
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List discovered plugins
    List,

    /// Install a plugin from an archive or the package index
    Install {
        /// Archive path, or package name with --index
        source: String,

        /// Treat SOURCE as a package on the index
        #[arg(long)]
        index: bool,

        /// Version range when installing from the index
        #[arg(long, default_value = "latest")]
        range: String,
    },

    /// Uninstall a plugin and purge its state
    Uninstall { id: String },

    /// Enable and activate a plugin
    Enable { id: String },

    /// Disable a plugin and tear down its registrations
    Disable { id: String },

    /// Call a plugin function and print the outcome
    Call {
        plugin: String,
        function: String,

        /// JSON arguments
        #[arg(default_value = "null")]
        args: String,
    },

    /// Inspect the shared package store
    Packages {
        #[command(subcommand)]
        action: Option<PackagesCommand>,
    },

    /// Manage automation items
    Automation {
        #[command(subcommand)]
        action: AutomationCommand,
    },

    /// Activate plugins and run the automation scheduler until Ctrl-C
    Serve,
}

#[derive(Subcommand)]
enum PackagesCommand {
    /// List stored packages and versions
    List,

    /// Remove one stored version
    Remove { name: String, version: String },

    /// Remove every version no plugin links to
    Prune,
}

#[derive(Subcommand)]
enum AutomationCommand {
    /// List items
    List,

    /// Print one item as JSON
    Show { id: String },

    /// Delete an item
    Remove { id: String },

    /// Merge items from a JSON array file
    Import { file: PathBuf },

    /// Run an item now
    Run {
        id: String,

        /// Skip conditions and run even when disabled
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(HostConfig::default_path);
    let host = Host::open(&config_path)?;
    let format = cli.format;

    match cli.command {
        Command::List => run_list(&host, format),
        Command::Install {
            source,
            index,
            range,
        } => run_install(&host, &source, index, &range, format).await,
        Command::Uninstall { id } => {
            let removed = host.manager.uninstall(&id).await?;
            println!("Uninstalled {}", removed.id);
            Ok(())
        }
        Command::Enable { id } => {
            let activation = host.manager.enable(&id).await?;
            emit(format, &activation, || {
                println!(
                    "Enabled {} ({} exports)",
                    activation.plugin,
                    activation.exports.len()
                );
            })
        }
        Command::Disable { id } => {
            let teardown = host.manager.disable(&id).await?;
            emit(format, &teardown, || {
                println!(
                    "Disabled {id}: {} functions, {} subscriptions, {} periods, {} minute triggers removed",
                    teardown.functions, teardown.subscriptions, teardown.periods, teardown.minute_triggers
                );
            })
        }
        Command::Call {
            plugin,
            function,
            args,
        } => run_call(&host, &plugin, &function, &args).await,
        Command::Packages { action } => {
            run_packages(&host, action.unwrap_or(PackagesCommand::List), format)
        }
        Command::Automation { action } => run_automation(&host, action, format).await,
        Command::Serve => run_serve(host).await,
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("PLUGDECK_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Process-wide runtime: context, plugin manager, discovered registry.
struct Host {
    ctx: Arc<HostContext>,
    manager: PluginManager,
}

impl Host {
    fn open(config_path: &std::path::Path) -> Result<Self> {
        let config = HostConfig::load(config_path)
            .wrap_err_with(|| format!("Failed to load {}", config_path.display()))?;
        let kv: Arc<dyn KvStore> = Arc::new(
            JsonFileStore::open(&config.state_file).wrap_err("Failed to open host state")?,
        );

        let ctx = HostContext::new(config, kv);
        ctx.set_missing_plugin_hook(Arc::new(|plugin: &str, function: &str| {
            tracing::warn!(plugin, function, "call to a plugin that is not installed");
        }));

        let manager = PluginManager::from_context(ctx.clone());
        manager.discover();
        Ok(Self { ctx, manager })
    }

    fn engine(&self) -> Result<AutomationEngine> {
        AutomationEngine::from_config(self.ctx.config(), self.ctx.clone())
            .wrap_err("Failed to load automation items")
    }
}

/// Print `value` as JSON, or run `text` for the text format.
fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

fn run_list(host: &Host, format: OutputFormat) -> Result<()> {
    let plugins: Vec<PluginDescriptor> = host.ctx.registry().list().cloned().collect();
    emit(format, &plugins, || {
        if plugins.is_empty() {
            println!("No plugins in {}", host.ctx.config().plugins_root.display());
            return;
        }
        println!("{}", "─".repeat(72));
        for plugin in &plugins {
            println!(
                " {:<24} {:<10} {:<10} {:<9} {}",
                truncate(&plugin.id, 24),
                truncate(plugin.version(), 10),
                plugin.kind.to_string(),
                if plugin.enabled { "enabled" } else { "disabled" },
                plugin.name()
            );
        }
        println!("{}", "─".repeat(72));
        println!(" {} plugin(s)", plugins.len());
    })
}

async fn run_install(
    host: &Host,
    source: &str,
    index: bool,
    range: &str,
    format: OutputFormat,
) -> Result<()> {
    let installed = if index {
        eprintln!("Fetching {source}@{range}...");
        host.manager.install_from_index(source, range).await?
    } else {
        let archive = PathBuf::from(source)
            .canonicalize()
            .wrap_err("Invalid archive path")?;
        host.manager.install_archive(&archive).await?
    };

    emit(format, &installed, || {
        println!(
            "Installed {} {} into {}",
            installed.plugin.id,
            installed.plugin.version(),
            installed.plugin.dir.display()
        );
        if let Some(activation) = &installed.activation {
            for package in &activation.packages.resolved {
                println!("  linked {}@{}", package.name, package.version);
            }
            for (name, error) in &activation.packages.failed {
                println!("  package {name} failed: {error}");
            }
        }
        if let Some(error) = &installed.error {
            println!("  activation failed: {error}");
        }
    })
}

async fn run_call(host: &Host, plugin: &str, function: &str, args: &str) -> Result<()> {
    let args: Value = serde_json::from_str(args).wrap_err("ARGS must be JSON")?;
    let report = host.manager.activate_all().await;
    for (id, error) in &report.failed {
        tracing::warn!(plugin = %id, %error, "plugin not active");
    }

    let outcome = host.ctx.call(plugin, function, args).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    host.manager.shutdown();
    if outcome.ok {
        Ok(())
    } else {
        Err(eyre!("call failed"))
    }
}

fn run_packages(host: &Host, action: PackagesCommand, format: OutputFormat) -> Result<()> {
    let store = host.manager.resolver().store();
    let roots = host.ctx.config().package_user_roots();

    match action {
        PackagesCommand::List => {
            let packages = store.list();
            emit(format, &packages, || {
                if packages.is_empty() {
                    println!("Package store at {} is empty", store.root().display());
                    return;
                }
                let mut total = 0;
                for package in &packages {
                    println!("{}", package.name);
                    for stored in &package.versions {
                        total += stored.size;
                        let users = store.users_of(&package.name, &stored.version, &roots);
                        println!(
                            "  {:<14} {:>10}  {}",
                            stored.version,
                            format_size(stored.size),
                            if users.is_empty() {
                                "unused".to_string()
                            } else {
                                users.join(", ")
                            }
                        );
                    }
                }
                println!();
                println!("Total: {}", format_size(total));
            })
        }
        PackagesCommand::Remove { name, version } => {
            store.remove_version(&name, &version, &roots)?;
            println!("Removed {name}@{version}");
            Ok(())
        }
        PackagesCommand::Prune => {
            let removed = store.prune_unused(&roots);
            emit(format, &removed, || {
                for (name, version) in &removed {
                    println!("Removed {name}@{version}");
                }
                println!("{} version(s) pruned", removed.len());
            })
        }
    }
}

async fn run_automation(host: &Host, action: AutomationCommand, format: OutputFormat) -> Result<()> {
    let engine = host.engine()?;
    let store = engine.store().clone();

    match action {
        AutomationCommand::List => {
            let items = store.list();
            emit(format, &items, || {
                for item in &items {
                    println!(
                        " {:<20} {:<9} {:<28} {}",
                        truncate(&item.id, 20),
                        if item.enabled { "enabled" } else { "disabled" },
                        truncate(&describe_triggers(item), 28),
                        item.last_success_at.as_deref().unwrap_or("never")
                    );
                }
                println!(" {} item(s)", items.len());
            })
        }
        AutomationCommand::Show { id } => {
            let item = store.require(&id)?;
            println!("{}", serde_json::to_string_pretty(&item)?);
            Ok(())
        }
        AutomationCommand::Remove { id } => {
            if !store.remove(&id)? {
                return Err(eyre!("No automation item '{id}'"));
            }
            println!("Removed {id}");
            Ok(())
        }
        AutomationCommand::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
            let count = store.import(&json)?;
            println!("Imported {count} item(s) into {}", store.path().display());
            Ok(())
        }
        AutomationCommand::Run { id, force } => {
            host.manager.activate_all().await;
            let report = engine.run_now(&id, force).await?;
            let result = emit(format, &report, || print_run(&report));
            host.manager.shutdown();
            result
        }
    }
}

async fn run_serve(host: Host) -> Result<()> {
    let report = host.manager.activate_all().await;
    tracing::info!(
        activated = report.activated.len(),
        failed = report.failed.len(),
        "plugins activated"
    );
    for (id, error) in &report.failed {
        eprintln!("plugin {id} failed to activate: {error}");
    }

    let engine = Arc::new(host.engine()?);
    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(scheduler::run(engine.clone(), cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for Ctrl-C")?;
    eprintln!("Shutting down...");

    cancel.cancel();
    scheduler.await.wrap_err("Scheduler task failed")?;
    engine.drain(Duration::from_secs(5)).await;
    host.manager.shutdown();
    Ok(())
}

fn describe_triggers(item: &AutomationItem) -> String {
    let parts: Vec<String> = item
        .triggers
        .iter()
        .map(|t| match (t.time(), t.protocol()) {
            (Some(time), _) => format!("at {time}"),
            (None, Some(text)) => format!("/{}", text.trim_start_matches('/')),
            (None, None) => t.kind.clone(),
        })
        .collect();
    if parts.is_empty() {
        "manual".to_string()
    } else {
        parts.join(", ")
    }
}

fn print_run(report: &RunReport) {
    println!("{}: {}", report.item, report.status);
    if let Some(decision) = report.decision {
        println!("  confirmation: {decision}");
    }
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!("  [{}] {} ok", outcome.index, outcome.kind),
            Some(error) => println!("  [{}] {} failed: {error}", outcome.index, outcome.kind),
        }
    }
}

/// Format bytes as human-readable size.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
