//! The quarry command line: shortcut expansion, cache and namespace flags,
//! and plain-table output over the query engine.

mod kubectl;
mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use engine::{CacheFlag, Engine, Namespace, Query, Registry, WallClock};
use models::InitFile;
use values::parse_age;

/// Query Kubernetes and other structured data with SQL.
#[derive(Debug, Parser)]
#[clap(name = "quarry", version)]
struct Args {
    /// Kubernetes namespace to query
    #[clap(short = 'n', long)]
    namespace: Option<String>,

    /// Query all Kubernetes namespaces
    #[clap(short = 'a', long)]
    all_namespaces: bool,

    /// Always refresh resources, ignoring cached data
    #[clap(short = 'u', long)]
    update: bool,

    /// Always use cached data, however old
    #[clap(short = 'c', long)]
    cache: bool,

    /// Don't warn or pause when cached data is stale
    #[clap(short = 'r', long)]
    reckless: bool,

    /// Override the cache timeout, e.g. "5m"
    #[clap(short = 't', long)]
    timeout: Option<String>,

    /// The SQL query, or the name of a shortcut from init.yaml
    query: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(std::env::args().collect()).await {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(mut argv: Vec<String>) -> anyhow::Result<()> {
    let home = quarry_home()?;
    std::fs::create_dir_all(&home)
        .with_context(|| format!("failed to create {}", home.display()))?;
    let init: InitFile = models::load_file(&home.join("init.yaml"))?;

    // A final argument containing no whitespace names a shortcut, whose
    // argv fragment replaces it. Expansion may chain.
    let mut depth = 0;
    while argv.len() > 1 {
        let last = argv.last().context("missing query")?;
        if last.starts_with('-') || last.chars().any(char::is_whitespace) {
            break;
        }
        let Some(shortcut) = init.shortcut(last) else {
            bail!("no shortcut named '{last}'");
        };
        argv.pop();
        argv.extend(shortcut.args.iter().cloned());
        depth += 1;
        if depth > 10 {
            bail!("shortcut expansion is too deep");
        }
    }

    let args = match Args::try_parse_from(&argv) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    if args.update && args.cache {
        bail!("cannot use both -c/--cache and -u/--update");
    }
    if args.all_namespaces && args.namespace.is_some() {
        bail!("cannot use both -a/--all-namespaces and -n/--namespace");
    }

    let mut settings = init.settings.clone();
    if args.reckless {
        settings.reckless = true;
    }
    if let Some(timeout) = &args.timeout {
        settings.cache_timeout = parse_age(timeout)?;
    }

    let namespace = if args.all_namespaces {
        Namespace::All
    } else {
        match &args.namespace {
            Some(name) => Namespace::Named(name.clone()),
            None => Namespace::Default,
        }
    };
    let flag = if args.update {
        CacheFlag::AlwaysUpdate
    } else if args.cache {
        CacheFlag::NeverUpdate
    } else {
        CacheFlag::Check
    };

    let engine = Engine::new(
        Registry::global(),
        settings,
        home.clone(),
        quarry_cache(&home),
        Arc::new(WallClock),
        Arc::new(kubectl::Kubectl),
        namespace,
    )?;
    let result = engine
        .query(&Query::new(args.query.clone(), "kubernetes"), flag)
        .await?;
    output::print_table(&result);
    Ok(())
}

/// `$QUARRY_HOME`, or the OS user configuration directory.
fn quarry_home() -> anyhow::Result<PathBuf> {
    if let Ok(home) = std::env::var("QUARRY_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::config_dir()
        .map(|dir| dir.join("quarry"))
        .context("cannot determine the user configuration directory")
}

/// `$QUARRY_CACHE`, or a cache directory under the quarry home.
fn quarry_cache(home: &Path) -> PathBuf {
    std::env::var("QUARRY_CACHE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home.join("cache"))
}
