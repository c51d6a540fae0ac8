/*!
Per-round operating costs of miners

Costs arrive as a daily table in USD (`date`, `miner_id`, `cost_usd_per_day`).
A [`CostResolver`] converts each entry to satoshi per round using the BTC/USD
price of that day and answers `(date, miner)` lookups, falling back to the
miner's average cost when a day is missing.

Rows with an empty cost are kept: their `daily_share` still counts when
miners are ranked by [`CostTable::top_by_share`]. They are left out of cost
averages and of the resolver.
*/

use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::Path,
};

use serde::Deserialize;

use crate::{
    feed::PriceIndex,
    miner::{Miner, MinerId, MinerSet, MinerSetError},
};

/// Blocks expected per day; daily costs are spread evenly over them.
pub const ROUNDS_PER_DAY: f64 = 144.0;

/// Satoshi per bitcoin.
pub const SAT_PER_BTC: f64 = 100_000_000.0;

/// Columns which must be present in a daily cost table.
pub const REQUIRED_COLUMNS: [&str; 3] =
    ["date", "miner_id", "cost_usd_per_day"];

/// Converts a daily USD cost to satoshi per round at the given price.
#[inline]
pub fn usd_per_day_to_sat_per_round(
    cost_usd_per_day: f64,
    btc_usd: f64,
) -> f64 {
    cost_usd_per_day / ROUNDS_PER_DAY / btc_usd * SAT_PER_BTC
}

#[derive(Debug, thiserror::Error)]
pub enum CostError {
    #[error("could not read daily cost table")]
    Csv(#[from] csv::Error),
    #[error("could not open daily cost table {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("daily cost table is missing required columns: {0:?}")]
    MissingColumns(Vec<String>),
    #[error("daily cost table contains no rows with a cost")]
    Empty,
    #[error("daily cost table has no daily_share values to rank miners by")]
    NoShares,
    #[error("cannot select the top 0 miners")]
    ZeroMinersRequested,
    #[error(transparent)]
    MinerSet(#[from] MinerSetError),
}

/// One row of the daily cost table.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyCost {
    pub date: String,
    pub miner_id: MinerId,
    /// Daily operating cost in USD, if known.
    pub cost_usd_per_day: Option<f64>,
    /// Fraction of the day's blocks produced by the miner, if known.
    pub daily_share: Option<f64>,
    pub pool_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CostRow {
    date: Option<String>,
    miner_id: Option<f64>,
    cost_usd_per_day: Option<f64>,
    #[serde(default)]
    daily_share: Option<f64>,
    #[serde(default)]
    pool_name: Option<String>,
}

impl CostRow {
    /// Converts this row to a [`DailyCost`], or `None` if it has no date,
    /// no miner, or neither a cost nor a share.
    fn into_cost(self) -> Option<DailyCost> {
        let miner_id = self.miner_id.filter(|m| m.is_finite() && *m >= 0.0)?;
        let cost_usd_per_day = self.cost_usd_per_day.filter(|c| c.is_finite());
        let daily_share = self.daily_share.filter(|s| s.is_finite());
        if cost_usd_per_day.is_none() && daily_share.is_none() {
            return None;
        }

        Some(DailyCost {
            date: self.date.filter(|d| !d.is_empty())?,
            miner_id: MinerId::from(miner_id as u64),
            cost_usd_per_day,
            daily_share,
            pool_name: self.pool_name.filter(|p| !p.is_empty()),
        })
    }
}

/// Daily cost table, validated to hold at least one cost.
#[derive(Debug, Clone, PartialEq)]
pub struct CostTable {
    rows: Vec<DailyCost>,
}

impl CostTable {
    pub fn new(rows: Vec<DailyCost>) -> Result<Self, CostError> {
        if rows.iter().all(|row| row.cost_usd_per_day.is_none()) {
            return Err(CostError::Empty);
        }

        Ok(Self { rows })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CostError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| CostError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_reader(file)
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, CostError> {
        let mut rdr = csv::Reader::from_reader(reader);

        let headers = rdr.headers()?.clone();
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|col| !headers.iter().any(|h| h == **col))
            .map(|col| col.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(CostError::MissingColumns(missing));
        }

        let mut rows = vec![];
        for row in rdr.deserialize::<CostRow>() {
            if let Some(cost) = row?.into_cost() {
                rows.push(cost);
            }
        }

        let table = Self::new(rows)?;
        tracing::info!(rows = table.rows.len(), "loaded daily cost table");

        Ok(table)
    }

    pub fn rows(&self) -> &[DailyCost] {
        &self.rows
    }

    /// Keeps only the rows of miners in `miners`.
    pub fn restricted_to(&self, miners: &MinerSet) -> Result<Self, CostError> {
        let rows = self
            .rows
            .iter()
            .filter(|row| miners.position(row.miner_id).is_some())
            .cloned()
            .collect();

        Self::new(rows)
    }

    /// Mean daily USD cost of each miner over the rows with a cost.
    pub fn average_usd_per_day(&self) -> BTreeMap<MinerId, f64> {
        let mut sums: BTreeMap<MinerId, (f64, usize)> = BTreeMap::new();
        for row in self.rows.iter() {
            if let Some(cost) = row.cost_usd_per_day {
                let entry = sums.entry(row.miner_id).or_default();
                entry.0 += cost;
                entry.1 += 1;
            }
        }

        sums.into_iter()
            .map(|(id, (sum, count))| (id, sum / count as f64))
            .collect()
    }

    /// Selects the `n` miners with the highest average `daily_share`,
    /// normalizes their shares to sum to one and assigns each its average
    /// per-round cost at the mean BTC/USD price. Ties are broken by miner ID.
    pub fn top_by_share(
        &self,
        n: usize,
        prices: &PriceIndex,
    ) -> Result<MinerSet, CostError> {
        if n == 0 {
            return Err(CostError::ZeroMinersRequested);
        }

        let mut shares: BTreeMap<MinerId, (f64, usize)> = BTreeMap::new();
        let mut names: HashMap<MinerId, &str> = HashMap::new();
        for row in self.rows.iter() {
            if let Some(share) = row.daily_share {
                let entry = shares.entry(row.miner_id).or_default();
                entry.0 += share;
                entry.1 += 1;
            }
            if let Some(name) = row.pool_name.as_deref() {
                names.entry(row.miner_id).or_insert(name);
            }
        }
        if shares.is_empty() {
            return Err(CostError::NoShares);
        }

        let mut ranked: Vec<(MinerId, f64)> = shares
            .into_iter()
            .map(|(id, (sum, count))| (id, sum / count as f64))
            .collect();
        // Stable sort keeps ascending ID order among equal shares
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);

        let total: f64 = ranked.iter().map(|(_, share)| share).sum();
        let costs = self.average_usd_per_day();

        let miners = ranked
            .into_iter()
            .map(|(id, share)| {
                let usd = costs.get(&id).copied().unwrap_or_default();
                let cost = usd_per_day_to_sat_per_round(usd, prices.mean());
                let miner = Miner::new(id, share / total, cost);

                match names.get(&id) {
                    Some(name) => miner.with_name(*name),
                    None => miner,
                }
            })
            .collect();

        Ok(MinerSet::new(miners)?)
    }
}

/// Resolves the per-round cost of a miner on a given day.
///
/// Lookups go through two tiers: the exact `(date, miner)` entry of the cost
/// table, then the miner's average cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostResolver {
    by_date: HashMap<String, HashMap<MinerId, f64>>,
}

impl CostResolver {
    /// Creates a resolver with no date-specific entries; every lookup falls
    /// back to the miner's average cost.
    pub fn averages_only() -> Self {
        Self::default()
    }

    /// Converts every row of `table` that has a cost to satoshi per round
    /// using the price of its day, or the mean price if the day has none.
    pub fn new(table: &CostTable, prices: &PriceIndex) -> Self {
        let mut resolver = Self::default();
        for row in table.rows() {
            let Some(usd) = row.cost_usd_per_day else {
                continue;
            };

            let price = prices.price_on(&row.date);
            resolver.insert(
                row.date.clone(),
                row.miner_id,
                usd_per_day_to_sat_per_round(usd, price),
            );
        }

        resolver
    }

    /// Sets the per-round cost (in satoshi) of `miner` on `date`.
    pub fn insert(&mut self, date: String, miner: MinerId, cost: f64) {
        self.by_date.entry(date).or_default().insert(miner, cost);
    }

    /// Per-round cost of `miner` on `date`.
    pub fn resolve(&self, date: &str, miner: &Miner) -> f64 {
        self.by_date
            .get(date)
            .and_then(|costs| costs.get(&miner.id()))
            .copied()
            .unwrap_or_else(|| miner.average_cost())
    }

    /// Number of distinct `(date, miner)` entries.
    pub fn len(&self) -> usize {
        self.by_date.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
