/*!
Historical block records consumed by a simulation

A [`BlockFeed`] is a finite, ordered list of [`BlockRecord`]s. Simulations read
it cyclically: round `t` uses record `t mod N`, so a feed shorter than the
number of simulated rounds simply wraps around.

# Loading

Feeds are normally loaded from the consolidated per-block CSV table:

```
use fee_market_sim::prelude::*;

let csv = "\
date,total_vbytes,avg_sat_per_vb,mev_sat,block_subsidy_sat,btc_usd,miner_id
2024-04-19,998000,12.5,0,312500000,63000,1
2024-04-19,1000000,15.0,20000,312500000,63000,2
";

let feed = BlockFeed::from_reader(csv.as_bytes()).unwrap();
assert_eq!(feed.len(), 2);
assert_eq!(feed.get(2), feed.get(0));
```
*/

use std::{collections::BTreeMap, collections::HashMap, io, path::Path};

use serde::Deserialize;

use crate::{miner::MinerId, utils};

/// Columns which must be present in a block feed table.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "total_vbytes",
    "avg_sat_per_vb",
    "mev_sat",
    "date",
    "block_subsidy_sat",
];

/// Number of blocks between subsidy halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Subsidy of the first halving epoch, in satoshi.
pub const INITIAL_SUBSIDY_SAT: u64 = 50 * 100_000_000;

/// Returns the protocol block subsidy at `height`, in satoshi.
pub fn subsidy_at_height(height: u64) -> u64 {
    let epoch = height / HALVING_INTERVAL;
    if epoch >= 64 {
        return 0;
    }

    INITIAL_SUBSIDY_SAT >> epoch
}

/// One historical block, as seen by the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRecord {
    /// Height of the block, if known.
    pub height: Option<u64>,
    /// Calendar day of the block, used as a lookup key for prices and costs.
    pub date: String,
    /// Virtual size of the block.
    pub total_vbytes: f64,
    /// Average fee rate paid in the block (satoshi per virtual byte).
    pub avg_sat_per_vb: f64,
    /// Auxiliary (MEV) revenue of the block, in satoshi.
    pub mev_sat: f64,
    /// Block subsidy, in satoshi.
    pub block_subsidy_sat: f64,
    /// BTC/USD price for `date`, if known.
    pub btc_usd: Option<f64>,
    /// Miner who actually produced the block, if known.
    pub miner_id: Option<MinerId>,
}

impl BlockRecord {
    /// Total fee paid in the block as recorded, in satoshi.
    #[inline]
    pub fn raw_fee(&self) -> f64 {
        self.avg_sat_per_vb * self.total_vbytes
    }

    /// Subsidy halving epoch of this block, if its height is known.
    #[inline]
    pub fn epoch(&self) -> Option<u64> {
        self.height.map(|h| h / HALVING_INTERVAL)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("could not read block feed")]
    Csv(#[from] csv::Error),
    #[error("could not open block feed {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("block feed is missing required columns: {0:?}")]
    MissingColumns(Vec<String>),
    #[error("block feed contains no complete rows")]
    Empty,
}

/// Row layout of the consolidated block table. Numeric identifiers are read
/// as floats since upstream tables may store them with a fractional part.
#[derive(Debug, Deserialize)]
struct BlockRow {
    #[serde(default)]
    height: Option<f64>,
    date: Option<String>,
    total_vbytes: Option<f64>,
    avg_sat_per_vb: Option<f64>,
    mev_sat: Option<f64>,
    block_subsidy_sat: Option<f64>,
    #[serde(default)]
    btc_usd: Option<f64>,
    #[serde(default)]
    miner_id: Option<f64>,
}

impl BlockRow {
    /// Converts this row to a [`BlockRecord`], or `None` if any required
    /// field is empty.
    fn into_record(self) -> Option<BlockRecord> {
        let date = self.date.filter(|d| !d.is_empty())?;

        Some(BlockRecord {
            height: self.height.filter(|h| h.is_finite()).map(|h| h as u64),
            date,
            total_vbytes: self.total_vbytes?,
            avg_sat_per_vb: self.avg_sat_per_vb?,
            mev_sat: self.mev_sat?,
            block_subsidy_sat: self.block_subsidy_sat?,
            btc_usd: self.btc_usd.filter(|p| p.is_finite() && *p > 0.0),
            miner_id: self
                .miner_id
                .filter(|m| m.is_finite() && *m >= 0.0)
                .map(|m| MinerId::from(m as u64)),
        })
    }
}

/// Ordered sequence of [`BlockRecord`]s, read cyclically.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockFeed {
    records: Vec<BlockRecord>,
}

impl BlockFeed {
    /// Creates a feed from already-loaded records.
    pub fn new(records: Vec<BlockRecord>) -> Result<Self, FeedError> {
        if records.is_empty() {
            return Err(FeedError::Empty);
        }

        Ok(Self { records })
    }

    /// Loads a feed from a CSV file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| FeedError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_reader(file)
    }

    /// Loads a feed from CSV data. Rows with an empty required field are
    /// skipped.
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, FeedError> {
        let mut rdr = csv::Reader::from_reader(reader);

        let headers = rdr.headers()?.clone();
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|col| !headers.iter().any(|h| h == **col))
            .map(|col| col.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(FeedError::MissingColumns(missing));
        }

        let mut records = vec![];
        let mut dropped = 0usize;
        for row in rdr.deserialize::<BlockRow>() {
            match row?.into_record() {
                Some(record) => records.push(record),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            tracing::warn!(dropped, "skipped block rows with missing fields");
        }

        let feed = Self::new(records)?;
        tracing::info!(blocks = feed.len(), "loaded block feed");
        for (epoch, count) in feed.epoch_counts() {
            tracing::info!(
                epoch,
                blocks = count,
                subsidy_sat = subsidy_at_height(epoch * HALVING_INTERVAL),
                "halving epoch"
            );
        }

        Ok(feed)
    }

    /// Number of records in the feed. Never zero.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always `false`; feeds are validated to be non-empty on creation.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index of the record used in `round`.
    #[inline]
    pub fn index_of(&self, round: usize) -> usize {
        round % self.records.len()
    }

    /// Record used in `round`, wrapping around the end of the feed.
    #[inline]
    pub fn get(&self, round: usize) -> &BlockRecord {
        &self.records[self.index_of(round)]
    }

    /// Number of blocks in each halving epoch, for records with a height.
    pub fn epoch_counts(&self) -> BTreeMap<u64, usize> {
        let mut counts = BTreeMap::new();
        for epoch in self.records.iter().filter_map(BlockRecord::epoch) {
            *counts.entry(epoch).or_default() += 1;
        }

        counts
    }

    /// Average fee-plus-auxiliary reward per block, excluding the subsidy.
    ///
    /// Computed as `mean(fee rate) * mean(size) + mean(mev)`, the scale used
    /// to turn deviation-incentive ratios into absolute incentives.
    pub fn mean_fee_reward(&self) -> f64 {
        let rates: Vec<_> =
            self.records.iter().map(|r| r.avg_sat_per_vb).collect();
        let sizes: Vec<_> =
            self.records.iter().map(|r| r.total_vbytes).collect();
        let mev: Vec<_> = self.records.iter().map(|r| r.mev_sat).collect();

        utils::mean(&rates) * utils::mean(&sizes) + utils::mean(&mev)
    }

    /// Builds the per-date BTC/USD price index of this feed, or `None` if no
    /// record carries a price.
    pub fn price_index(&self) -> Option<PriceIndex> {
        let mean =
            utils::mean_of_present(self.records.iter().map(|r| r.btc_usd))?;

        let mut by_date = HashMap::new();
        for record in self.records.iter() {
            if let Some(price) = record.btc_usd {
                by_date.entry(record.date.clone()).or_insert(price);
            }
        }

        Some(PriceIndex { by_date, mean })
    }
}

/// BTC/USD price per calendar day, with the feed-wide mean as fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceIndex {
    by_date: HashMap<String, f64>,
    mean: f64,
}

impl PriceIndex {
    pub fn new(by_date: HashMap<String, f64>, mean: f64) -> Self {
        Self { by_date, mean }
    }

    /// Price on `date`, or the mean price if the day is absent.
    pub fn price_on(&self, date: &str) -> f64 {
        self.by_date.get(date).copied().unwrap_or(self.mean)
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    const FEED: &str = "\
height,date,total_vbytes,avg_sat_per_vb,mev_sat,block_subsidy_sat,\
btc_usd,miner_id
839999,2024-04-19,1000000,10,500,625000000,60000,1
840000,2024-04-20,800000,20,0,312500000,64000,2.0
840001,2024-04-20,,20,0,312500000,64000,3
840002,2024-04-21,900000,30,100,312500000,,
";

    #[test]
    fn loads_complete_rows_only() {
        let feed = BlockFeed::from_reader(FEED.as_bytes()).unwrap();

        assert_eq!(feed.len(), 3);
        assert_eq!(feed.get(1).miner_id, Some(MinerId::from(2)));
        assert_eq!(feed.get(2).miner_id, None);
        assert_eq!(feed.get(2).btc_usd, None);
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let csv = "date,total_vbytes,avg_sat_per_vb,block_subsidy_sat\n\
                   2024-01-01,1,1,1\n";

        match BlockFeed::from_reader(csv.as_bytes()) {
            Err(FeedError::MissingColumns(cols)) => {
                assert_eq!(cols, vec!["mev_sat".to_string()])
            }
            other => panic!("expected missing columns, got {:?}", other),
        }
    }

    #[test]
    fn header_only_feed_is_empty() {
        let csv =
            "date,total_vbytes,avg_sat_per_vb,mev_sat,block_subsidy_sat\n";

        assert!(matches!(
            BlockFeed::from_reader(csv.as_bytes()),
            Err(FeedError::Empty)
        ));
    }

    #[test]
    fn rounds_wrap_cyclically() {
        let feed = BlockFeed::from_reader(FEED.as_bytes()).unwrap();

        assert_eq!(feed.index_of(3), 0);
        assert_eq!(feed.get(3), feed.get(0));
        assert_eq!(feed.get(7), feed.get(1));
    }

    #[test]
    fn epochs_follow_halving_boundary() {
        let feed = BlockFeed::from_reader(FEED.as_bytes()).unwrap();
        let counts = feed.epoch_counts();

        assert_eq!(counts.get(&3), Some(&1));
        assert_eq!(counts.get(&4), Some(&2));
        assert_eq!(subsidy_at_height(839_999), 625_000_000);
        assert_eq!(subsidy_at_height(840_000), 312_500_000);
    }

    #[test]
    fn price_index_falls_back_to_mean() {
        let feed = BlockFeed::from_reader(FEED.as_bytes()).unwrap();
        let prices = feed.price_index().unwrap();

        assert_eq!(prices.price_on("2024-04-20"), 64000.0);
        assert_relative_eq!(prices.mean(), 62000.0);
        assert_relative_eq!(prices.price_on("2030-01-01"), 62000.0);
    }

    #[test]
    fn mean_fee_reward_is_product_of_means_plus_mev() {
        let feed = BlockFeed::from_reader(FEED.as_bytes()).unwrap();

        assert_relative_eq!(feed.mean_fee_reward(), 20.0 * 900_000.0 + 200.0);
    }
}
