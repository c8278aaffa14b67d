use crate::{
    cancel::CancellationSignal,
    config::Config,
    directory::{Site, SiteDirectory, SiteMatch},
    monitor::{MonitorSession, PrtgSession},
    operation::{drive, Console, Foreground, OperationRunner, Outcome},
    probe::{ProbeParams, Prober, SystemPing},
    util::ensure_dir,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "storewatch")]
#[command(about = "Store network monitoring console (site lookup + link/VM ping checks)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./storewatch.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunOpts {
    /// Print the report as JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Cancel the operation after this many seconds.
    #[arg(long)]
    pub cancel_after: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Look up a site by id or name.
    Site { term: String },
    /// Ping one or more hosts concurrently.
    Ping {
        #[arg(required = true)]
        hosts: Vec<String>,
        #[arg(long)]
        count: Option<u32>,
        #[arg(long)]
        timeout: Option<f64>,
        #[arg(long)]
        max_concurrency: Option<usize>,
        #[command(flatten)]
        run: RunOpts,
    },
    /// Show the site's circuits as seen by the monitoring server.
    Circuits {
        site: String,
        #[command(flatten)]
        run: RunOpts,
    },
    /// Ping the site's links (addresses from the monitoring server).
    Links {
        site: String,
        #[command(flatten)]
        run: RunOpts,
    },
    /// Ping the site's local hosts.
    Vms {
        site: String,
        #[command(flatten)]
        run: RunOpts,
    },
    /// Check the ping program and the monitoring server connection.
    Doctor {},
}

pub fn dispatch(args: Args) -> Result<()> {
    let mut cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let _guard = init_logging(&args, &cfg)?;

    match &args.cmd {
        Command::Site { term } => site(&cfg, term),
        Command::Ping {
            hosts,
            count,
            timeout,
            max_concurrency,
            run,
        } => {
            if let Some(count) = count {
                cfg.probe.count = *count;
            }
            if let Some(timeout) = timeout {
                cfg.probe.timeout_seconds = *timeout;
            }
            if let Some(n) = max_concurrency {
                cfg.batch.max_concurrency = *n;
            }
            let hosts = hosts.clone();
            run_operation(&cfg, "ping", run, move |c, r| c.ping_hosts(&hosts, r))
        }
        Command::Circuits { site, run } => {
            let site = find_site(&cfg, site)?;
            run_operation(&cfg, "circuits", run, move |c, r| c.view_circuits(&site, r))
        }
        Command::Links { site, run } => {
            let site = find_site(&cfg, site)?;
            run_operation(&cfg, "links", run, move |c, r| c.check_links(&site, r))
        }
        Command::Vms { site, run } => {
            let site = find_site(&cfg, site)?;
            run_operation(&cfg, "vms", run, move |c, r| c.check_vms(&site, r))
        }
        Command::Doctor {} => doctor(&cfg),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["storewatch.toml", "storewatch.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Reports go to stdout; keep logs on stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if cfg.logging.write_to_file && !cfg.logging.file_path.is_empty() {
        let path = Path::new(&cfg.logging.file_path);
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn load_directory(cfg: &Config) -> Result<SiteDirectory> {
    SiteDirectory::load(Path::new(&cfg.directory.csv_path))
}

fn find_site(cfg: &Config, term: &str) -> Result<Site> {
    match load_directory(cfg)?.find(term) {
        SiteMatch::One(site) => Ok(site),
        SiteMatch::None => bail!("no site matches \"{term}\""),
        SiteMatch::Many(sites) => bail!(
            "multiple sites match \"{term}\"; refine the search:\n{}",
            site_list(&sites)
        ),
    }
}

fn site_list(sites: &[Site]) -> String {
    sites
        .iter()
        .map(|s| format!("  - {} (ID: {})", s.name, s.site_id))
        .collect::<Vec<_>>()
        .join("\n")
}

fn site(cfg: &Config, term: &str) -> Result<()> {
    match load_directory(cfg)?.find(term) {
        SiteMatch::None => println!("No site found for \"{term}\"."),
        SiteMatch::Many(sites) => println!(
            "Multiple sites found for \"{term}\". Refine the search.\n\nSites found:\n{}",
            site_list(&sites)
        ),
        SiteMatch::One(s) => {
            println!("--- Site information ---");
            println!("ID:       {}", s.site_id);
            println!("Name:     {}", s.name);
            println!(
                "Label:    {}",
                s.monitor_label(&cfg.monitor.site_label_prefix, cfg.monitor.site_label_digits)
            );
            println!("Core:     {}", s.core);
            println!("City:     {}", s.city);
            println!("State:    {}", s.state);
            println!("Manager:  {}", s.manager_contact);
            println!("Phone:    {}", s.phone);
        }
    }
    Ok(())
}

fn monitor_session(cfg: &Config) -> Result<Option<PrtgSession>> {
    if !cfg.monitor.is_configured() {
        return Ok(None);
    }
    PrtgSession::new(&cfg.monitor).map(Some)
}

fn run_operation<F>(cfg: &Config, name: &str, opts: &RunOpts, op: F) -> Result<()>
where
    F: FnOnce(&Console<SystemPing, PrtgSession>, &crate::operation::Reporter) -> Outcome
        + Send
        + 'static,
{
    let cancel = CancellationSignal::new();
    let prober = SystemPing::from_config(&cfg.probe)?;
    let console = Arc::new(Console::new(cfg, prober, monitor_session(cfg)?, cancel.clone())?);
    let runner = OperationRunner::new(cancel.clone());

    let cancel_after = opts
        .cancel_after
        .and_then(|s| Duration::try_from_secs_f64(s).ok());
    let handle = runner.start_console(name, &console, op)?;
    let outcome = drive(handle, &mut StdioForeground, &cancel, cancel_after);

    match outcome {
        Outcome::Completed(report) => {
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
            Ok(())
        }
        Outcome::Cancelled(msg) => {
            info!("{msg}");
            println!("Cancelled: {msg}");
            Ok(())
        }
        Outcome::Failed(msg) => bail!("{name} failed: {msg}"),
    }
}

struct StdioForeground;

impl Foreground for StdioForeground {
    fn status(&mut self, msg: &str) {
        eprintln!("> {msg}");
    }

    fn prompt(&mut self, msg: &str) -> String {
        eprint!("{msg} ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(_) => line.trim().to_string(),
            Err(_) => String::new(),
        }
    }
}

fn doctor(cfg: &Config) -> Result<()> {
    let prober = SystemPing::from_config(&cfg.probe)?;
    let params = ProbeParams::new(1, cfg.probe.timeout_seconds)?;
    let loopback = prober.probe("127.0.0.1", &params);

    let monitor = match monitor_session(cfg)? {
        Some(session) => match session.test_connection() {
            Ok(msg) => serde_json::json!({ "ok": true, "message": msg }),
            Err(e) => serde_json::json!({ "ok": false, "message": format!("{e:#}") }),
        },
        None => serde_json::json!({ "ok": false, "message": "not configured" }),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "ping_program": prober.program(),
            "flavor": prober.flavor(),
            "loopback_probe": loopback,
            "monitor": monitor,
            "site_directory": match load_directory(cfg) {
                Ok(dir) => serde_json::json!({ "ok": true, "sites": dir.len() }),
                Err(e) => serde_json::json!({ "ok": false, "message": format!("{e:#}") }),
            },
        }))?
    );
    Ok(())
}
