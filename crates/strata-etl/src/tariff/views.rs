//! Materialised views feeding the per-product imputation query.
//!
//! Built in dependency order; every definition is a plain `SELECT` so it
//! can be re-run verbatim on refresh.

use strata_core::table::TableRef;

use super::{
  TariffSources,
  countries::{EU_REPORTER, EU_TARIFF_CODE, WORLD_PARTNER, values_sql},
};

pub struct ViewDef {
  pub table:  TableRef,
  pub select: String,
  /// Column to index after (re)building, for the per-product lookups.
  pub index:  Option<&'static str>,
}

pub struct TariffViews {
  pub required_countries: TableRef,
  pub eu_countries:       TableRef,
  pub trade_flows:        TableRef,
  pub spine:              TableRef,
  pub observed_rates:     TableRef,
  pub world_rates:        TableRef,
  pub eu_reporter_rates:  TableRef,
  pub eu_partner_rates:   TableRef,
  pub bound_rates:        TableRef,
  sources:                TariffSources,
  cutoff_year:            i64,
}

impl TariffViews {
  /// Views named `<name>` next to `anchor`, reading from `sources`.
  pub fn new(anchor: &TableRef, sources: TariffSources, cutoff_year: i64) -> Self {
    let view = |name: &str| anchor.sibling(name);
    Self {
      required_countries: view("required_countries"),
      eu_countries: view("eu_countries"),
      trade_flows: view("trade_flows"),
      spine: view("spine"),
      observed_rates: view("observed_rates"),
      world_rates: view("world_rates"),
      eu_reporter_rates: view("eu_reporter_rates"),
      eu_partner_rates: view("eu_partner_rates"),
      bound_rates: view("bound_rates"),
      sources,
      cutoff_year,
    }
  }

  /// Every view with its definition, dependencies first.
  pub fn dag(&self) -> Vec<ViewDef> {
    let TariffSources { tariffs, bound_rates, baci, eu_membership } = &self.sources;
    let rc = &self.required_countries;
    let eu = &self.eu_countries;
    let flows = &self.trade_flows;
    let observed = &self.observed_rates;
    let cutoff = self.cutoff_year;

    vec![
      ViewDef { table: rc.clone(), select: values_sql(), index: None },
      ViewDef {
        table:  eu.clone(),
        select: format!(
          "SELECT DISTINCT m.year AS year, m.iso3 AS iso3
           FROM {eu_membership} m
           JOIN {rc} c ON c.iso3 = m.iso3
           WHERE m.tariff_code = '{EU_TARIFF_CODE}'"
        ),
        index:  None,
      },
      // Observed trade between required countries; importers report tariffs.
      ViewDef {
        table:  flows.clone(),
        select: format!(
          "SELECT DISTINCT b.product_category AS product, b.year AS year,
                  r.iso3 AS reporter, p.iso3 AS partner
           FROM {baci} b
           JOIN {rc} r ON r.iso_num = b.importer
           JOIN {rc} p ON p.iso_num = b.exporter
           WHERE b.year >= {cutoff}"
        ),
        index:  None,
      },
      ViewDef {
        table:  self.spine.clone(),
        select: format!(
          "SELECT pr.product AS product, y.year AS year, r.reporter AS reporter,
                  p.partner AS partner
           FROM (SELECT DISTINCT product FROM {flows}) pr
           CROSS JOIN (SELECT DISTINCT year FROM {flows}) y
           CROSS JOIN (SELECT DISTINCT reporter FROM {flows}) r
           CROSS JOIN (SELECT DISTINCT partner FROM {flows}) p
           WHERE r.reporter <> p.partner"
        ),
        index:  Some("product"),
      },
      ViewDef {
        table:  observed.clone(),
        select: format!(
          "SELECT t.product AS product, t.year AS year, r.iso3 AS reporter, p.iso3 AS partner,
                  avg(CASE WHEN t.duty_type = 'AHS' THEN t.simple_average END) AS app_rate,
                  avg(CASE WHEN t.duty_type = 'PRF' THEN t.simple_average END) AS prf_rate,
                  avg(CASE WHEN t.duty_type = 'MFN' THEN t.simple_average END) AS mfn_rate,
                  avg(CASE WHEN t.duty_type = 'BND' THEN t.simple_average END) AS bnd_rate
           FROM {tariffs} t
           JOIN {rc} r ON r.iso_num = t.reporter
           JOIN {rc} p ON p.iso_num = t.partner
           WHERE t.year >= {cutoff}
           GROUP BY t.product, t.year, r.iso3, p.iso3"
        ),
        index:  Some("product"),
      },
      ViewDef {
        table:  self.world_rates.clone(),
        select: format!(
          "SELECT t.product AS product, t.year AS year, r.iso3 AS reporter,
                  avg(t.simple_average) AS mfn_rate
           FROM {tariffs} t
           JOIN {rc} r ON r.iso_num = t.reporter
           WHERE t.duty_type = 'MFN' AND t.partner = {WORLD_PARTNER} AND t.year >= {cutoff}
           GROUP BY t.product, t.year, r.iso3"
        ),
        index:  Some("product"),
      },
      // Rates the EU reports as one territory, expanded to its members.
      ViewDef {
        table:  self.eu_reporter_rates.clone(),
        select: format!(
          "SELECT t.product AS product, t.year AS year, e.iso3 AS reporter, p.iso3 AS partner,
                  avg(t.simple_average) AS eu_rep_rate
           FROM {tariffs} t
           JOIN {rc} p ON p.iso_num = t.partner
           JOIN {eu} e ON e.year = t.year
           WHERE t.reporter = {EU_REPORTER} AND t.duty_type = 'AHS'
             AND t.year >= {cutoff} AND e.iso3 <> p.iso3
           GROUP BY t.product, t.year, e.iso3, p.iso3"
        ),
        index:  Some("product"),
      },
      ViewDef {
        table:  self.eu_partner_rates.clone(),
        select: format!(
          "SELECT o.product AS product, o.year AS year, o.reporter AS reporter,
                  avg(o.app_rate) AS eu_part_rate
           FROM {observed} o
           JOIN {eu} e ON e.iso3 = o.partner AND e.year = o.year
           WHERE o.app_rate IS NOT NULL
           GROUP BY o.product, o.year, o.reporter"
        ),
        index:  Some("product"),
      },
      // One bound rate per reporter and product: the latest nomenclature.
      ViewDef {
        table:  self.bound_rates.clone(),
        select: format!(
          "SELECT b.product AS product, r.iso3 AS reporter, avg(b.bound_rate) AS bnd_rate
           FROM (
             SELECT reporter, product, bound_rate,
                    row_number() OVER (
                      PARTITION BY reporter, product
                      ORDER BY CAST(substr(nomen_code, -1) AS INTEGER) DESC
                    ) AS rn
             FROM {bound_rates}
           ) b
           JOIN {rc} r ON r.iso_num = b.reporter
           WHERE b.rn = 1
           GROUP BY b.product, r.iso3"
        ),
        index:  Some("product"),
      },
    ]
  }

  /// One product's spine joined to every rate source. Bound parameter
  /// `?1` is the product code. Column order matches
  /// [`super::decode_observation`].
  pub fn product_rates_sql(&self) -> String {
    let Self {
      spine,
      eu_countries: eu,
      observed_rates: observed,
      eu_reporter_rates: eu_rep,
      eu_partner_rates: eu_part,
      world_rates: world,
      bound_rates: bound,
      ..
    } = self;
    format!(
      "SELECT s.reporter, s.partner, s.year,
              o.app_rate, o.prf_rate, er.eu_rep_rate, ep.eu_part_rate,
              coalesce(o.mfn_rate, w.mfn_rate) AS mfn_rate,
              coalesce(o.bnd_rate, b.bnd_rate) AS bnd_rate,
              re.iso3 IS NOT NULL AS reporter_eu,
              pe.iso3 IS NOT NULL AS partner_eu
       FROM {spine} s
       LEFT JOIN {eu} re ON re.iso3 = s.reporter AND re.year = s.year
       LEFT JOIN {eu} pe ON pe.iso3 = s.partner AND pe.year = s.year
       LEFT JOIN {observed} o
         ON o.product = s.product AND o.year = s.year
        AND o.reporter = s.reporter AND o.partner = s.partner
       LEFT JOIN {eu_rep} er
         ON er.product = s.product AND er.year = s.year
        AND er.reporter = s.reporter AND er.partner = s.partner
       LEFT JOIN {eu_part} ep
         ON ep.product = s.product AND ep.year = s.year
        AND ep.reporter = s.reporter AND pe.iso3 IS NOT NULL
       LEFT JOIN {world} w
         ON w.product = s.product AND w.year = s.year AND w.reporter = s.reporter
       LEFT JOIN {bound} b ON b.product = s.product AND b.reporter = s.reporter
       WHERE s.product = ?1
       ORDER BY s.reporter, s.partner, s.year"
    )
  }
}
