//! Cross-session accumulation of rows for append-only tables.
//!
//! Rows are grouped by a bulk name, each name mapping to a registered [`BulkSpec`]. Buffers have
//! no size or count threshold: their rows are independent of each other and of any session, so
//! they are only written when the whole set is flushed by [`BulkSet::send_bulks`].

use std::collections::{BTreeMap, HashMap};

use observability_deps::tracing::{debug, error, trace};

use crate::{
    CommitError, Error, Result,
    store::{Row, Store},
    value::Value,
};

/// Name of the bulk collecting autocomplete suggestions.
pub const AUTOCOMPLETES: &str = "autocompletes";

/// Describes where the rows of one named bulk buffer are inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkSpec {
    name: String,
    table: String,
    columns: Vec<String>,
    suffix: Option<String>,
}

impl BulkSpec {
    pub fn new<I, S>(name: impl Into<String>, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            suffix: None,
        }
    }

    /// SQL appended after the `VALUES` list, e.g. an `ON CONFLICT` clause.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// `INSERT INTO <table> (<columns>) ` - the part of the insert preceding `VALUES`.
    pub fn insert_prefix(&self) -> String {
        format!("INSERT INTO {} ({}) ", self.table, self.columns.join(", "))
    }
}

/// The bulks every deployment writes.
pub fn default_specs() -> Vec<BulkSpec> {
    vec![
        BulkSpec::new(
            AUTOCOMPLETES,
            "autocomplete",
            ["value", "type", "project_id"],
        )
        .with_suffix("ON CONFLICT DO NOTHING"),
    ]
}

/// Named, unordered row buffers shared by all sessions.
#[derive(Debug, Default)]
pub struct BulkSet {
    specs: HashMap<String, BulkSpec>,
    buffers: BTreeMap<String, Vec<Row>>,
}

impl BulkSet {
    pub fn new(specs: impl IntoIterator<Item = BulkSpec>) -> Self {
        Self {
            specs: specs
                .into_iter()
                .map(|spec| (spec.name().to_string(), spec))
                .collect(),
            buffers: BTreeMap::new(),
        }
    }

    /// Buffer `row` for the bulk named `name`.
    ///
    /// A row whose first column is zero-length is dropped without error.
    pub fn append(&mut self, name: &str, row: Row) -> Result<()> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| Error::UnknownBulk(name.to_string()))?;

        if row.len() != spec.columns().len() {
            return Err(Error::BulkArity {
                name: name.to_string(),
                expected: spec.columns().len(),
                got: row.len(),
            });
        }

        if row.first().is_some_and(Value::is_zero_length) {
            trace!(bulk = name, "dropping row with empty primary value");
            return Ok(());
        }

        self.buffers.entry(name.to_string()).or_default().push(row);
        Ok(())
    }

    /// Rows currently buffered for `name`.
    pub fn buffered(&self, name: &str) -> &[Row] {
        self.buffers.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Total number of buffered rows across all names.
    pub fn len(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every non-empty buffer as one insert per name and clear it.
    ///
    /// A name whose insert fails keeps its rows for the next call; the remaining names are
    /// still attempted.
    pub async fn send_bulks(&mut self, store: &dyn Store) -> Result<(), CommitError> {
        let mut failures = vec![];

        for (name, rows) in self.buffers.iter_mut().filter(|(_, rows)| !rows.is_empty()) {
            let Some(spec) = self.specs.get(name) else {
                // buffers are only created for registered names
                continue;
            };

            match store.insert_bulk(spec, rows).await {
                Ok(()) => {
                    debug!(bulk = %name, n_rows = rows.len(), "bulk flushed");
                    rows.clear();
                }
                Err(source) => {
                    error!(
                        bulk = %name,
                        n_rows = rows.len(),
                        error = %source,
                        "failed to flush bulk, rows retained for retry"
                    );
                    failures.push(Error::BulkFlush {
                        name: name.clone(),
                        source,
                    });
                }
            }
        }

        CommitError::check(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::{MockStore, StoreOp};
    use assert_matches::assert_matches;

    fn autocomplete(value: &str, kind: &str, project: i64) -> Row {
        vec![value.into(), kind.into(), project.into()]
    }

    #[tokio::test]
    async fn empty_primary_value_is_dropped() {
        let store = MockStore::default();
        let mut bulks = BulkSet::new(default_specs());

        bulks
            .append(AUTOCOMPLETES, autocomplete("", "type", 1))
            .unwrap();
        assert!(bulks.is_empty());
        bulks
            .append(AUTOCOMPLETES, autocomplete("foo", "type", 1))
            .unwrap();

        bulks.send_bulks(&store).await.unwrap();

        assert_eq!(
            store.applied(),
            vec![StoreOp::Bulk {
                name: AUTOCOMPLETES.to_string(),
                rows: vec![autocomplete("foo", "type", 1)],
            }]
        );
        assert!(bulks.is_empty());
    }

    #[test]
    fn rejects_unknown_names_and_wrong_arity() {
        let mut bulks = BulkSet::new(default_specs());

        assert_matches!(
            bulks.append("clicks", autocomplete("foo", "type", 1)),
            Err(Error::UnknownBulk(name)) if name == "clicks"
        );
        assert_matches!(
            bulks.append(AUTOCOMPLETES, vec!["foo".into()]),
            Err(Error::BulkArity { expected: 3, got: 1, .. })
        );
        assert!(bulks.is_empty());
    }

    #[tokio::test]
    async fn failed_name_is_retained_others_flush() {
        let store = MockStore::default();
        let mut bulks = BulkSet::new(
            default_specs()
                .into_iter()
                .chain([BulkSpec::new("errors", "errors", ["message", "project_id"])]),
        );

        bulks
            .append(AUTOCOMPLETES, autocomplete("foo", "CLICK", 1))
            .unwrap();
        bulks
            .append("errors", vec!["oops".into(), 1_i64.into()])
            .unwrap();
        store.fail_bulk("errors", 1);

        let err = bulks.send_bulks(&store).await.unwrap_err();
        assert_matches!(err.failures(), [Error::BulkFlush { name, .. }] if name == "errors");
        assert!(bulks.buffered(AUTOCOMPLETES).is_empty());
        assert_eq!(bulks.buffered("errors").len(), 1);

        // retried on the next flush
        bulks.send_bulks(&store).await.unwrap();
        assert!(bulks.is_empty());
        assert_eq!(
            store.bulk_rows("errors"),
            vec![vec![Value::from("oops"), Value::from(1_i64)]]
        );
    }

    #[test]
    fn insert_prefix() {
        let [spec] = default_specs().try_into().unwrap();
        assert_eq!(
            spec.insert_prefix(),
            "INSERT INTO autocomplete (value, type, project_id) "
        );
        assert_eq!(spec.suffix(), Some("ON CONFLICT DO NOTHING"));
    }
}
