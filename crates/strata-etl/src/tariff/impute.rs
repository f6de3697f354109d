//! Resolution of one tariff per `(reporter, partner, year)` for a product.
//!
//! Resolution order, first available wins:
//!
//! 1. observed applied rate (AHS), else observed preferential rate (PRF)
//! 2. rate reported by the EU for its member reporter
//! 3. reporter's average rate towards EU partners
//! 4. most-favoured-nation rate
//! 5. bound rate
//! 6. zero when reporter and partner are both EU members that year
//!
//! Gaps left after that are forward-filled along each `(reporter, partner)`
//! series by year, then filled with the reporter's average observed rate,
//! then with the average observed rate over all reporters.

use std::collections::BTreeMap;

use strata_core::store::{Row, Value};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
  pub app_rate:     Option<f64>,
  pub prf_rate:     Option<f64>,
  pub eu_rep_rate:  Option<f64>,
  pub eu_part_rate: Option<f64>,
  pub mfn_rate:     Option<f64>,
  pub bnd_rate:     Option<f64>,
}

impl Rates {
  /// A rate actually reported for this pair.
  pub fn observed(&self) -> Option<f64> { self.app_rate.or(self.prf_rate) }
}

/// One spine row joined to every rate source.
#[derive(Debug, Clone, PartialEq)]
pub struct RateObservation {
  pub reporter:    String,
  pub partner:     String,
  pub year:        i64,
  pub rates:       Rates,
  pub reporter_eu: bool,
  pub partner_eu:  bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImputedTariff {
  pub product:         i64,
  pub reporter:        String,
  pub partner:         String,
  pub year:            i64,
  pub assumed_tariff:  Option<f64>,
  pub rates:           Rates,
  pub country_average: Option<f64>,
  pub world_average:   Option<f64>,
}

impl ImputedTariff {
  /// Values in the order of the output table's columns.
  pub fn into_row(self) -> Row {
    vec![
      Value::Integer(self.product),
      Value::Text(self.reporter),
      Value::Text(self.partner),
      Value::Integer(self.year),
      self.assumed_tariff.into(),
      self.rates.app_rate.into(),
      self.rates.prf_rate.into(),
      self.rates.mfn_rate.into(),
      self.rates.bnd_rate.into(),
      self.rates.eu_rep_rate.into(),
      self.rates.eu_part_rate.into(),
      self.country_average.into(),
      self.world_average.into(),
    ]
  }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

pub fn resolve(rates: &Rates, both_eu: bool) -> Option<f64> {
  rates
    .observed()
    .or(rates.eu_rep_rate)
    .or(rates.eu_part_rate)
    .or(rates.mfn_rate)
    .or(rates.bnd_rate)
    .or(both_eu.then_some(0.0))
}

pub fn round3(x: f64) -> f64 { (x * 1000.0).round() / 1000.0 }

#[derive(Debug, Clone, Copy, Default)]
struct Mean {
  sum: f64,
  n:   usize,
}

impl Mean {
  fn add(&mut self, v: Option<f64>) {
    if let Some(v) = v {
      self.sum += v;
      self.n += 1;
    }
  }

  fn get(&self) -> Option<f64> { (self.n > 0).then(|| self.sum / self.n as f64) }
}

#[derive(Default)]
struct Accumulated {
  app_rate:     Mean,
  prf_rate:     Mean,
  eu_rep_rate:  Mean,
  eu_part_rate: Mean,
  mfn_rate:     Mean,
  bnd_rate:     Mean,
  reporter_eu:  bool,
  partner_eu:   bool,
}

impl Accumulated {
  fn add(&mut self, o: &RateObservation) {
    self.app_rate.add(o.rates.app_rate);
    self.prf_rate.add(o.rates.prf_rate);
    self.eu_rep_rate.add(o.rates.eu_rep_rate);
    self.eu_part_rate.add(o.rates.eu_part_rate);
    self.mfn_rate.add(o.rates.mfn_rate);
    self.bnd_rate.add(o.rates.bnd_rate);
    self.reporter_eu |= o.reporter_eu;
    self.partner_eu |= o.partner_eu;
  }

  fn rates(&self) -> Rates {
    Rates {
      app_rate:     self.app_rate.get(),
      prf_rate:     self.prf_rate.get(),
      eu_rep_rate:  self.eu_rep_rate.get(),
      eu_part_rate: self.eu_part_rate.get(),
      mfn_rate:     self.mfn_rate.get(),
      bnd_rate:     self.bnd_rate.get(),
    }
  }
}

/// Impute one tariff per `(reporter, partner, year)` of `product`.
///
/// Duplicate observations of the same key are averaged component-wise
/// first. Output is ordered by reporter, partner and year; every value is
/// rounded to three decimals.
pub fn impute(product: i64, observations: Vec<RateObservation>) -> Vec<ImputedTariff> {
  let mut grouped: BTreeMap<(String, String, i64), Accumulated> = BTreeMap::new();
  for o in &observations {
    grouped
      .entry((o.reporter.clone(), o.partner.clone(), o.year))
      .or_default()
      .add(o);
  }

  let mut world = Mean::default();
  let mut by_reporter: BTreeMap<&str, Mean> = BTreeMap::new();
  for ((reporter, _, _), acc) in &grouped {
    let observed = acc.rates().observed();
    world.add(observed);
    by_reporter.entry(reporter.as_str()).or_default().add(observed);
  }
  let world_average = world.get();
  let country_averages: BTreeMap<String, Option<f64>> = by_reporter
    .into_iter()
    .map(|(r, m)| (r.to_owned(), m.get()))
    .collect();

  // BTreeMap order is (reporter, partner, year): each series is contiguous
  // and sorted by year.
  let mut out = Vec::with_capacity(grouped.len());
  let mut series: Option<(String, String)> = None;
  let mut carried: Option<f64> = None;
  for ((reporter, partner, year), acc) in grouped {
    let same_series = series
      .as_ref()
      .is_some_and(|(r, p)| *r == reporter && *p == partner);
    if !same_series {
      series = Some((reporter.clone(), partner.clone()));
      carried = None;
    }

    let rates = acc.rates();
    let resolved = resolve(&rates, acc.reporter_eu && acc.partner_eu);
    if resolved.is_some() {
      carried = resolved;
    }
    let country_average = country_averages.get(&reporter).copied().flatten();
    let assumed = resolved.or(carried).or(country_average).or(world_average);

    out.push(ImputedTariff {
      product,
      reporter,
      partner,
      year,
      assumed_tariff: assumed.map(round3),
      rates: Rates {
        app_rate:     rates.app_rate.map(round3),
        prf_rate:     rates.prf_rate.map(round3),
        eu_rep_rate:  rates.eu_rep_rate.map(round3),
        eu_part_rate: rates.eu_part_rate.map(round3),
        mfn_rate:     rates.mfn_rate.map(round3),
        bnd_rate:     rates.bnd_rate.map(round3),
      },
      country_average: country_average.map(round3),
      world_average: world_average.map(round3),
    });
  }
  out
}
