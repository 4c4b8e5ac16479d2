//! Loaders for tab-separated interaction and catalog files.
//!
//! The expected shapes match the Last.fm dataset: an interactions file
//! with a header row and `(user id, item id, weight)` columns, and a
//! catalog file with a header row whose first two columns are an item id
//! and a display name. File locations are supplied by the caller; the
//! library bakes in no paths.
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use failure::Fail;

use crate::data::{Interaction, Interactions};
use crate::ranking::Recommendation;
use crate::{ItemId, PredictionError, UserId};

/// Errors raised while reading delimited files.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// The underlying file could not be read or parsed.
    #[fail(display = "malformed input: {}", _0)]
    Csv(#[fail(cause)] csv::Error),
    /// A record was missing a required column.
    #[fail(display = "record is missing column {}", column)]
    MissingColumn {
        /// Zero-based index of the missing column.
        column: usize,
    },
    /// An id column held something other than a non-negative integer.
    #[fail(display = "invalid id value {:?}", value)]
    InvalidId {
        /// The offending field contents.
        value: String,
    },
}

impl From<csv::Error> for DatasetError {
    fn from(error: csv::Error) -> Self {
        DatasetError::Csv(error)
    }
}

fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.delimiter(b'\t').has_headers(true).flexible(true);

    builder
}

/// Read interactions from tab-separated data with a header row and
/// `(user id, item id, weight)` columns.
pub fn read_interactions<R: Read>(reader: R) -> Result<Interactions, DatasetError> {
    let csv_reader = reader_builder().from_reader(reader);

    read_interactions_from(csv_reader)
}

/// Read interactions from a tab-separated file.
pub fn load_interactions<P: AsRef<Path>>(path: P) -> Result<Interactions, DatasetError> {
    let csv_reader = reader_builder().from_path(path)?;

    read_interactions_from(csv_reader)
}

fn read_interactions_from<R: Read>(
    mut csv_reader: csv::Reader<R>,
) -> Result<Interactions, DatasetError> {
    let mut interactions = Vec::new();

    for record in csv_reader.deserialize() {
        let (user_id, item_id, weight): (UserId, ItemId, f32) = record?;
        interactions.push(Interaction::new(user_id, item_id, weight));
    }

    Ok(Interactions::from(interactions))
}

/// Maps item ids to display names.
///
/// The catalog never influences scores; it is consulted only when
/// presenting ranked output. A missing id is reported explicitly rather
/// than being conflated with an unrated item.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    names: HashMap<ItemId, String>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Catalog::default()
    }

    /// Register a display name for an item.
    pub fn insert(&mut self, item_id: ItemId, name: String) {
        self.names.insert(item_id, name);
    }

    /// Look up the display name of an item.
    pub fn name(&self, item_id: ItemId) -> Option<&str> {
        self.names.get(&item_id).map(String::as_str)
    }

    /// Number of catalogued items.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve ranked output into `(name, score)` pairs, failing on the
    /// first item id missing from the catalog.
    pub fn resolve(
        &self,
        recommendations: &[Recommendation],
    ) -> Result<Vec<(String, f32)>, PredictionError> {
        recommendations
            .iter()
            .map(|recommendation| {
                self.name(recommendation.item_id)
                    .map(|name| (name.to_owned(), recommendation.score))
                    .ok_or(PredictionError::UnknownItem {
                        item_id: recommendation.item_id,
                    })
            })
            .collect()
    }
}

/// Read a catalog from tab-separated data with a header row; the first
/// column is the item id, the second the display name. Extra columns are
/// ignored.
pub fn read_catalog<R: Read>(reader: R) -> Result<Catalog, DatasetError> {
    let csv_reader = reader_builder().from_reader(reader);

    read_catalog_from(csv_reader)
}

/// Read a catalog from a tab-separated file.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Catalog, DatasetError> {
    let csv_reader = reader_builder().from_path(path)?;

    read_catalog_from(csv_reader)
}

fn read_catalog_from<R: Read>(mut csv_reader: csv::Reader<R>) -> Result<Catalog, DatasetError> {
    let mut catalog = Catalog::new();

    for record in csv_reader.records() {
        let record = record?;

        let id_field = record
            .get(0)
            .ok_or(DatasetError::MissingColumn { column: 0 })?;
        let item_id = id_field
            .parse::<ItemId>()
            .map_err(|_| DatasetError::InvalidId {
                value: id_field.to_owned(),
            })?;
        let name = record
            .get(1)
            .ok_or(DatasetError::MissingColumn { column: 1 })?;

        catalog.insert(item_id, name.to_owned());
    }

    Ok(catalog)
}
