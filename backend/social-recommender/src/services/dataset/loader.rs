//! Flat-file dataset loading.
//!
//! Ratings are tab-separated `user_id \t item_id \t rating` rows; the social
//! file holds `user_id \t user_id` trust pairs. A leading header row is
//! skipped when none of its fields is numeric.

use super::history::{HistoryTables, InteractionTable};
use super::social::SocialGraph;
use crate::config::DatasetConfig;
use crate::error::{AppError, Result};
use crate::models::{ItemId, RatingEdge, SocialEdge, UserId};
use csv::StringRecord;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

pub const TRAIN_FILE: &str = "train.tsv";
pub const TEST_FILE: &str = "test.tsv";
pub const VAL_FILE: &str = "val.tsv";
pub const SOCIAL_FILE: &str = "filtered_social_connections.tsv";

/// Fully preprocessed dataset, ready for training and evaluation.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub history: HistoryTables,
    pub train: Vec<RatingEdge>,
    pub test: Vec<RatingEdge>,
    /// Present only when tuning on a validation split.
    pub val: Option<Vec<RatingEdge>>,
    pub social: SocialGraph,
    /// Distinct rating values, ascending.
    pub ratings_list: Vec<f32>,
    pub num_users: usize,
    pub num_items: usize,
}

/// Raw partitions as read from disk, keyed by (user, item).
#[derive(Debug, Clone, Default)]
pub struct RawSplits {
    pub train: InteractionTable,
    pub test: InteractionTable,
    pub val: InteractionTable,
}

impl Dataset {
    /// Read `<data_dir>/<name>/*.tsv` and preprocess.
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        let dir = config.data_dir.join(&config.name);
        info!(dataset = %config.name, dir = %dir.display(), "Loading dataset");

        let splits = RawSplits {
            train: read_rating_table(&dir.join(TRAIN_FILE))?,
            test: read_rating_table(&dir.join(TEST_FILE))?,
            val: read_rating_table(&dir.join(VAL_FILE))?,
        };
        let social = read_social_graph(&dir.join(SOCIAL_FILE))?;

        Self::from_splits(&config.name, splits, social, config.validate)
    }

    /// Build the dataset from in-memory partitions.
    ///
    /// With `validate == false` the validation rows are folded into train and
    /// no validation stream is produced.
    pub fn from_splits(
        name: &str,
        mut splits: RawSplits,
        social: SocialGraph,
        validate: bool,
    ) -> Result<Self> {
        if !validate {
            splits.train.merge(&splits.val);
        }

        let train = to_edges(&splits.train);
        let test = to_edges(&splits.test);
        if train.is_empty() {
            return Err(AppError::MalformedData(format!(
                "dataset {} has no training interactions",
                name
            )));
        }
        if test.is_empty() {
            return Err(AppError::MalformedData(format!(
                "dataset {} has no test interactions",
                name
            )));
        }

        let num_users = train
            .iter()
            .chain(test.iter())
            .map(|e| e.user)
            .max()
            .map_or(0, |m| m as usize + 1);
        let num_items = train
            .iter()
            .chain(test.iter())
            .map(|e| e.item)
            .max()
            .map_or(0, |m| m as usize + 1);

        let val = if validate {
            let val = to_edges(&splits.val);
            check_id_range("validation", &val, num_users, num_items)?;
            Some(val)
        } else {
            None
        };

        let mut ratings_list: Vec<f32> = train.iter().map(|e| e.rating).collect();
        ratings_list.sort_by(|a, b| a.total_cmp(b));
        ratings_list.dedup();

        let history = HistoryTables::from_edges(&train);

        info!(
            dataset = name,
            num_users,
            num_items,
            train = train.len(),
            test = test.len(),
            val = val.as_ref().map_or(0, Vec::len),
            rating_levels = ratings_list.len(),
            social_edges = social.num_edges(),
            "Dataset preprocessed"
        );

        Ok(Self {
            name: name.to_string(),
            history,
            train,
            test,
            val,
            social,
            ratings_list,
            num_users,
            num_items,
        })
    }

    /// Distinct users of the test partition, ascending.
    pub fn test_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.test.iter().map(|e| e.user).collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    /// Items of the test partition, with repetition.
    pub fn test_items(&self) -> Vec<ItemId> {
        self.test.iter().map(|e| e.item).collect()
    }

    pub fn mean_train_rating(&self) -> f32 {
        let sum: f64 = self.train.iter().map(|e| e.rating as f64).sum();
        (sum / self.train.len().max(1) as f64) as f32
    }
}

fn to_edges(table: &InteractionTable) -> Vec<RatingEdge> {
    table
        .edges()
        .map(|(user, item, rating)| RatingEdge::new(user, item, rating))
        .collect()
}

fn check_id_range(
    partition: &str,
    edges: &[RatingEdge],
    num_users: usize,
    num_items: usize,
) -> Result<()> {
    if let Some(bad) = edges
        .iter()
        .find(|e| e.user as usize >= num_users || e.item as usize >= num_items)
    {
        return Err(AppError::MalformedData(format!(
            "{} edge ({}, {}) outside id range [0, {}) x [0, {})",
            partition, bad.user, bad.item, num_users, num_items
        )));
    }
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| AppError::io(format!("opening {}", path.display()), e))
}

/// Read a rating file into a user-keyed table. Duplicate pairs keep the last row.
pub fn read_rating_table(path: &Path) -> Result<InteractionTable> {
    let edges = parse_ratings(open(path)?, path)?;
    let rows = edges.len();
    let table: InteractionTable = edges.into_iter().collect();
    debug!(
        path = %path.display(),
        rows,
        unique_pairs = table.num_edges(),
        "Read rating file"
    );
    Ok(table)
}

pub fn read_social_graph(path: &Path) -> Result<SocialGraph> {
    let edges = parse_social(open(path)?, path)?;
    Ok(SocialGraph::from_edges(edges))
}

pub fn parse_ratings<R: Read>(reader: R, source: &Path) -> Result<Vec<RatingEdge>> {
    let edges: Vec<RatingEdge> = read_rows(reader, source, 3)?;
    if let Some(bad) = edges.iter().find(|e| !e.rating.is_finite()) {
        return Err(AppError::MalformedData(format!(
            "{}: rating of ({}, {}) is not finite",
            source.display(),
            bad.user,
            bad.item
        )));
    }
    Ok(edges)
}

pub fn parse_social<R: Read>(reader: R, source: &Path) -> Result<Vec<SocialEdge>> {
    read_rows(reader, source, 2)
}

/// Deserialize the leading `columns` fields of every row into `T`.
///
/// A first row with no numeric field is a header and is skipped. Blank lines
/// are ignored; extra trailing columns are allowed.
fn read_rows<R, T>(reader: R, source: &Path, columns: usize) -> Result<Vec<T>>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut first = true;
    for result in reader.records() {
        let record = result.map_err(|e| csv_error(source, e))?;
        let line = record.position().map_or(0, |p| p.line());
        if std::mem::take(&mut first) && is_header(&record) {
            continue;
        }
        if record.len() < columns {
            return Err(malformed(
                source,
                line,
                &format!("expected {} columns, found {}", columns, record.len()),
            ));
        }
        let leading: StringRecord = record.iter().take(columns).collect();
        let row = leading
            .deserialize(None)
            .map_err(|e| malformed(source, line, &e.to_string()))?;
        rows.push(row);
    }
    Ok(rows)
}

fn is_header(record: &StringRecord) -> bool {
    record.iter().all(|field| field.parse::<f64>().is_err())
}

fn csv_error(source: &Path, err: csv::Error) -> AppError {
    let line = err.position().map_or(0, |p| p.line());
    match err.into_kind() {
        csv::ErrorKind::Io(e) => AppError::io(format!("reading {}", source.display()), e),
        other => malformed(source, line, &format!("{:?}", other)),
    }
}

fn malformed(source: &Path, line: u64, reason: &str) -> AppError {
    AppError::MalformedData(format!("{}:{}: {}", source.display(), line, reason))
}
