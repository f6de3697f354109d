//! `strata`: ingest datafiles into the layered store and run the tariff
//! transform.
//!
//! # Usage
//!
//! ```
//! strata run --all
//! strata run --source world_bank.tariff --products 10110,10120
//! strata transform --continue
//! strata registry --source dit.baci
//! strata ignore dit.baci 2019/broken.csv
//! ```

mod settings;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand};
use settings::Settings;
use strata_core::registry::RegistryEntry;
use strata_etl::{
  DatafileRegistry, Manager, RunReport,
  catalog::{EngineSettings, Source, register_source},
  storage::LocalStorage,
  tariff::{TariffOptions, TariffTransformPipeline},
};
use strata_store_sqlite::SqliteStore;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "strata", version, about = "Layered ingestion and tariff imputation")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "strata.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Ingest every new datafile of the selected source groups.
  Run {
    /// Source group to run, e.g. `world_bank.tariff`. Repeatable.
    #[arg(long = "source", value_name = "GROUP")]
    sources: Vec<Source>,

    /// Run every source group.
    #[arg(long, conflicts_with = "sources")]
    all: bool,

    #[command(flatten)]
    transform: TransformArgs,
  },

  /// Run only the tariff transform.
  Transform {
    #[command(flatten)]
    transform: TransformArgs,
  },

  /// List registry entries.
  Registry {
    /// Only entries of this pipeline, e.g. `dit.baci`.
    #[arg(long)]
    source: Option<String>,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
  },

  /// Never process a datafile again.
  Ignore {
    /// Pipeline, e.g. `dit.baci`.
    source: String,
    /// File name relative to the pipeline's directory, e.g. `2019/broken.csv`.
    file:   String,
  },
}

#[derive(Args, Debug, Clone)]
struct TransformArgs {
  /// Drop and rebuild the intermediate views.
  #[arg(long)]
  force: bool,

  /// Keep earlier partial output and only impute missing products.
  #[arg(long = "continue")]
  resume: bool,

  /// Only impute these product codes.
  #[arg(long, value_delimiter = ',', value_name = "CODES")]
  products: Option<Vec<i64>>,
}

impl TransformArgs {
  fn options(&self, settings: &Settings) -> TariffOptions {
    TariffOptions {
      force:       self.force,
      resume:      self.resume,
      products:    self.products.clone(),
      workers:     settings.tariff.workers,
      cutoff_year: settings.tariff.cutoff_year,
    }
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)
    .with_context(|| format!("failed to read settings from {}", cli.config.display()))?;

  let database_path = expand_tilde(&settings.database_path);
  let store = SqliteStore::open(&database_path)
    .await
    .with_context(|| format!("failed to open store at {database_path:?}"))?;
  let registry = DatafileRegistry::open(store.clone())
    .await
    .context("failed to open datafile registry")?;

  match cli.command {
    Command::Run { sources, all, transform } => {
      let groups = if all { Source::ALL.to_vec() } else { sources };
      if groups.is_empty() {
        bail!("nothing to run: pass --source <GROUP> or --all");
      }
      let engine = EngineSettings {
        statement_timeout: settings.statement_timeout(),
        tariff:            transform.options(&settings),
      };
      let mut manager = Manager::new(local_storage(&settings), registry);
      for group in groups {
        register_source(&mut manager, &store, group, &engine)
          .await
          .with_context(|| format!("failed to register {group}"))?;
      }
      let report = manager.process_all().await.context("run aborted")?;
      print_report(&report)?;
    }

    Command::Transform { transform } => {
      let pipeline = TariffTransformPipeline::new(
        store.clone(),
        transform.options(&settings),
        settings.statement_timeout(),
      )
      .await
      .context("failed to set up tariff transform")?;
      let mut manager = Manager::new(local_storage(&settings), registry);
      manager.register(Box::new(pipeline), None)?;
      let report = manager.process_all().await.context("transform aborted")?;
      print_report(&report)?;
    }

    Command::Registry { source, json } => {
      let entries = registry.entries(source.as_deref()).await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
      } else {
        print_entries(&entries);
      }
    }

    Command::Ignore { source, file } => {
      registry
        .ignore(&source, &file)
        .await
        .with_context(|| format!("cannot ignore {source}/{file}"))?;
      info!(%source, %file, "datafile ignored");
    }
  }

  Ok(())
}

fn local_storage(settings: &Settings) -> LocalStorage {
  LocalStorage::new(expand_tilde(&settings.storage_root))
}

fn print_report(report: &RunReport) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(report)?);
  if report.failed() > 0 {
    warn!(failed = report.failed(), "some datafiles failed; see `strata registry`");
  }
  Ok(())
}

fn print_entries(entries: &[RegistryEntry]) {
  for e in entries {
    let updated = e
      .updated_at
      .map(|t| t.to_rfc3339())
      .unwrap_or_else(|| "-".into());
    let file = if e.file_name.is_empty() { "-" } else { &e.file_name };
    println!(
      "{:>6}  {:<32} {:<40} {:<10} {:<25} {}",
      e.id,
      e.source,
      file,
      e.state.as_str(),
      updated,
      e.error_message.as_deref().unwrap_or("")
    );
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_run_flags() {
    let cli = Cli::try_parse_from([
      "strata",
      "run",
      "--source",
      "world_bank.tariff",
      "--continue",
      "--products",
      "1,2",
    ])
    .unwrap();
    let Command::Run { sources, all, transform } = cli.command else {
      panic!("expected run");
    };
    assert_eq!(sources, vec![Source::WorldBankTariff]);
    assert!(!all);
    assert!(transform.resume && !transform.force);
    assert_eq!(transform.products, Some(vec![1, 2]));
  }

  #[test]
  fn rejects_unknown_source_group() {
    assert!(Cli::try_parse_from(["strata", "run", "--source", "nope.nope"]).is_err());
  }

  #[test]
  fn all_conflicts_with_sources() {
    assert!(
      Cli::try_parse_from(["strata", "run", "--all", "--source", "dit.reference_postcodes"])
        .is_err()
    );
  }
}
