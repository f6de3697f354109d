//! Concrete dataset declarations and the source groups the binary exposes.
//!
//! A source group lists its pipelines in dependency order: everything the
//! tariff transform reads is ingested earlier in the same group.

use std::{fmt, ops::RangeInclusive, str::FromStr, time::Duration};

use strata_core::{
  dataset::{Dataset, DelimitedFormat, TransformMap},
  identity::PipelineId,
  storage::ObjectStorage,
  store::Store,
  table::{ColumnDef, ColumnType, columns},
};
use tracing::info;

use crate::{
  Error, Manager, Result,
  incremental::IncrementalPipeline,
  pipeline::{DEFAULT_STATEMENT_TIMEOUT, Pipeline},
  snapshot::SnapshotPipeline,
  tariff::{TariffOptions, TariffTransformPipeline},
};

use ColumnType::{Date, Decimal, Integer, Text};

const STRIP_EMPTY_QUOTES: DelimitedFormat = DelimitedFormat {
  delimiter:          b',',
  quote:              b'"',
  has_header:         true,
  strip_empty_quotes: true,
};

// ─── Datasets ────────────────────────────────────────────────────────────────

const ONS_POSTCODE_COLUMNS: [&str; 50] = [
  "pcd", "pcd2", "pcds", "dointr", "doterm", "oscty", "ced", "oslaua", "osward",
  "parish", "usertype", "oseast1m", "osnrth1m", "osgrdind", "oshlthau", "nhser",
  "ctry", "rgn", "streg", "pcon", "eer", "teclec", "ttwa", "pct", "nuts",
  "statsward", "oa01", "casward", "park", "lsoa01", "msoa01", "ur01ind", "oac01",
  "oa11", "lsoa11", "msoa11", "wz11", "ccg", "bua11", "buasd11", "ru11ind",
  "oac11", "lat", "long", "lep1", "lep2", "pfa", "imd", "calncv", "stp",
];

/// `YYYYMM` text to the first day of that month; anything else to NULL.
fn year_month_to_date(column: &str) -> String {
  format!(
    "CASE WHEN length(\"{column}\") = 6
       THEN substr(\"{column}\", 1, 4) || '-' || substr(\"{column}\", 5, 2) || '-01' END"
  )
}

pub fn ons_postcode_directory() -> Result<Dataset> {
  let raw: Vec<(&str, ColumnType)> = ONS_POSTCODE_COLUMNS.iter().map(|c| (*c, Text)).collect();
  let curated: Vec<(&str, ColumnType)> = ONS_POSTCODE_COLUMNS
    .iter()
    .map(|c| match *c {
      "dointr" | "doterm" => (*c, Date),
      _ => (*c, Text),
    })
    .collect();
  Ok(
    Dataset::new(
      PipelineId::new("ons", "postcode_directory")?,
      columns(&raw),
      columns(&curated),
    )
    .with_transforms(
      TransformMap::new()
        .with("dointr", year_month_to_date("dointr"))
        .with("doterm", year_month_to_date("doterm")),
    )
    .with_format(STRIP_EMPTY_QUOTES),
  )
}

pub fn dit_reference_postcodes() -> Result<Dataset> {
  let cols = columns(&[
    ("postcode", Text),
    ("local_authority_district_code", Text),
    ("local_authority_district_name", Text),
    ("local_enterprise_partnership_lep1_code", Text),
    ("local_enterprise_partnership_lep1_name", Text),
    ("local_enterprise_partnership_lep2_code", Text),
    ("local_enterprise_partnership_lep2_name", Text),
    ("region_code", Text),
    ("region_name", Text),
    ("national_grid_ref_easting", Text),
    ("national_grid_ref_northing", Text),
    ("date_of_introduction", Date),
    ("date_of_termination", Date),
  ]);
  Ok(
    Dataset::new(PipelineId::new("dit", "reference_postcodes")?, cols.clone(), cols)
      .with_format(STRIP_EMPTY_QUOTES),
  )
}

/// Years covered by the EU membership delivery, one column each.
pub const EU_MEMBERSHIP_YEARS: RangeInclusive<u16> = 1958..=2018;

/// Delivered wide (`country, iso3` then one tariff-code column per year)
/// and stored long: one curated row per country and year with a code.
pub fn dit_eu_country_membership() -> Result<Dataset> {
  let years: Vec<String> = EU_MEMBERSHIP_YEARS.map(|y| y.to_string()).collect();
  let mut raw = columns(&[("country", Text), ("iso3", Text)]);
  raw.extend(years.iter().map(|y| ColumnDef::new(y.as_str(), Text)));
  Ok(
    Dataset::new(
      PipelineId::new("dit", "eu_country_membership")?,
      raw,
      columns(&[
        ("country", Text),
        ("iso3", Text),
        ("year", Integer),
        ("tariff_code", Text),
      ]),
    )
    .with_unpivot(&years, "year", "tariff_code"),
  )
}

pub fn comtrade_country_code_and_iso() -> Result<Dataset> {
  let cols = columns(&[
    ("cty_code", Integer),
    ("cty_name_english", Text),
    ("cty_fullname_english", Text),
    ("cty_abbreviation", Text),
    ("cty_comments", Text),
    ("iso2_digit_alpha", Text),
    ("iso3_digit_alpha", Text),
    ("start_valid_year", Text),
    ("end_valid_year", Text),
  ]);
  Ok(Dataset::new(
    PipelineId::new("comtrade", "country_code_and_iso")?,
    cols.clone(),
    cols,
  ))
}

/// Several nomenclature revisions per reporter and product; the tariff
/// engine picks the latest.
pub fn world_bank_bound_rates() -> Result<Dataset> {
  Ok(Dataset::new(
    PipelineId::new("world_bank", "bound_rates")?,
    columns(&[
      ("nomen_code", Text),
      ("reporter", Integer),
      ("product", Integer),
      ("bound_rate", Decimal),
      ("total_number_of_lines", Integer),
    ]),
    columns(&[
      ("nomen_code", Text),
      ("reporter", Integer),
      ("product", Integer),
      ("bound_rate", Decimal),
    ]),
  ))
}

pub fn dit_baci() -> Result<Dataset> {
  Ok(
    Dataset::new(
      PipelineId::new("dit", "baci")?,
      columns(&[
        ("t", Integer),
        ("hs6", Integer),
        ("i", Integer),
        ("j", Integer),
        ("v", Decimal),
        ("q", Decimal),
      ]),
      columns(&[
        ("year", Integer),
        ("product_category", Integer),
        ("exporter", Integer),
        ("importer", Integer),
        ("trade_flow_value", Decimal),
        ("quantity", Decimal),
      ]),
    )
    .with_transforms(
      TransformMap::new()
        .with("year", "\"t\"")
        .with("product_category", "\"hs6\"")
        .with("exporter", "\"i\"")
        .with("importer", "\"j\"")
        .with("trade_flow_value", "\"v\"")
        .with("quantity", "\"q\""),
    ),
  )
}

pub fn world_bank_tariff() -> Result<Dataset> {
  let cols = columns(&[
    ("reporter", Integer),
    ("year", Integer),
    ("product", Integer),
    ("partner", Integer),
    ("duty_type", Text),
    ("simple_average", Decimal),
    ("number_of_total_lines", Integer),
  ]);
  Ok(
    Dataset::new(PipelineId::new("world_bank", "tariff")?, cols.clone(), cols)
      .with_format(STRIP_EMPTY_QUOTES),
  )
}

// ─── Source groups ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  Snapshot,
  Incremental,
}

/// How one catalog dataset is ingested.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
  pub dataset:       Dataset,
  pub strategy:      Strategy,
  pub sub_directory: String,
}

impl CatalogEntry {
  fn new(dataset: Dataset, strategy: Strategy) -> Self {
    let sub_directory = format!("{}/{}", dataset.id.organisation(), dataset.id.dataset());
    Self { dataset, strategy, sub_directory }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
  OnsPostcodeDirectory,
  DitReferencePostcodes,
  /// Everything the tariff transform needs, followed by the transform.
  WorldBankTariff,
}

impl Source {
  pub const ALL: [Source; 3] = [
    Source::OnsPostcodeDirectory,
    Source::DitReferencePostcodes,
    Source::WorldBankTariff,
  ];

  pub fn data_source(self) -> &'static str {
    match self {
      Source::OnsPostcodeDirectory => "ons.postcode_directory",
      Source::DitReferencePostcodes => "dit.reference_postcodes",
      Source::WorldBankTariff => "world_bank.tariff",
    }
  }

  /// File-based datasets of the group, in ingestion order.
  pub fn entries(self) -> Result<Vec<CatalogEntry>> {
    use Strategy::{Incremental, Snapshot};
    Ok(match self {
      Source::OnsPostcodeDirectory => {
        vec![CatalogEntry::new(ons_postcode_directory()?, Snapshot)]
      }
      Source::DitReferencePostcodes => {
        vec![CatalogEntry::new(dit_reference_postcodes()?, Snapshot)]
      }
      Source::WorldBankTariff => vec![
        CatalogEntry::new(dit_eu_country_membership()?, Snapshot),
        CatalogEntry::new(comtrade_country_code_and_iso()?, Snapshot),
        CatalogEntry::new(world_bank_bound_rates()?, Snapshot),
        CatalogEntry::new(dit_baci()?, Incremental),
        CatalogEntry::new(world_bank_tariff()?, Incremental),
      ],
    })
  }

  /// Whether the group ends with the file-less tariff transform.
  pub fn has_transform(self) -> bool { self == Source::WorldBankTariff }
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.data_source())
  }
}

impl FromStr for Source {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Source::ALL
      .into_iter()
      .find(|src| src.data_source() == s)
      .ok_or_else(|| Error::Configuration(format!("unknown source group {s:?}")))
  }
}

// ─── Registration ────────────────────────────────────────────────────────────

/// Knobs shared by every pipeline a source group registers.
#[derive(Debug, Clone)]
pub struct EngineSettings {
  pub statement_timeout: Duration,
  pub tariff:            TariffOptions,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
      tariff:            TariffOptions::default(),
    }
  }
}

/// Build one pipeline per dataset of `source` and bind it on `manager`.
pub async fn register_source<S: Store, O: ObjectStorage>(
  manager: &mut Manager<S, O>,
  store: &S,
  source: Source,
  settings: &EngineSettings,
) -> Result<()> {
  let timeout = settings.statement_timeout;
  for entry in source.entries()? {
    let pipeline: Box<dyn Pipeline> = match entry.strategy {
      Strategy::Snapshot => {
        Box::new(SnapshotPipeline::new(store.clone(), entry.dataset, timeout).await?)
      }
      Strategy::Incremental => {
        Box::new(IncrementalPipeline::new(store.clone(), entry.dataset, timeout).await?)
      }
    };
    manager.register(pipeline, Some(&entry.sub_directory))?;
  }
  if source.has_transform() {
    let transform =
      TariffTransformPipeline::new(store.clone(), settings.tariff.clone(), timeout).await?;
    manager.register(Box::new(transform), None)?;
  }
  info!(%source, pipelines = manager.pipeline_ids().len(), "source group registered");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_dataset_declaration_is_valid() {
    for source in Source::ALL {
      for entry in source.entries().unwrap() {
        entry.dataset.validate().unwrap();
      }
    }
  }

  #[test]
  fn sub_directories_follow_identity() {
    let entries = Source::WorldBankTariff.entries().unwrap();
    let dirs: Vec<&str> = entries.iter().map(|e| e.sub_directory.as_str()).collect();
    assert_eq!(
      dirs,
      vec![
        "dit/eu_country_membership",
        "comtrade/country_code_and_iso",
        "world_bank/bound_rates",
        "dit/baci",
        "world_bank/tariff",
      ]
    );
  }

  #[test]
  fn postcode_dates_are_transformed() {
    let ds = ons_postcode_directory().unwrap();
    assert_eq!(ds.raw_columns.len(), 50);
    assert!(ds.transforms.expression("dointr").contains("substr"));
    assert_eq!(ds.transforms.expression("pcd"), "\"pcd\"");
    assert!(ds.format.strip_empty_quotes);
  }

  #[test]
  fn eu_membership_is_unpivoted_by_year() {
    let ds = dit_eu_country_membership().unwrap();
    assert_eq!(ds.raw_columns.len(), 2 + 61);
    assert_eq!(ds.raw_columns[2].name, "1958");
    assert_eq!(ds.raw_columns.last().unwrap().name, "2018");
    assert_eq!(ds.curated_key(), vec!["year"]);
    let strata_core::dataset::Derivation::Unpivot { columns, .. } = &ds.derivation else {
      panic!("expected an unpivot");
    };
    assert_eq!(columns.len(), 61);
  }

  #[test]
  fn sources_parse_from_data_source() {
    assert_eq!("world_bank.tariff".parse::<Source>().unwrap(), Source::WorldBankTariff);
    assert!(matches!("nope".parse::<Source>(), Err(Error::Configuration(_))));
  }
}
