//! Row/column view of the repository for query engines.
//!
//! A query engine sees one table per metric. Columns are `time`, `value` and
//! then one column per label key the metric has seen, sorted. Rows come from
//! [`Metric::scan_samples`] and nowhere else, so a query engine observes
//! exactly what any other reader would.

use std::{fmt, sync::Arc};

use serde::Serialize;

use crate::{
    clock::Timestamp,
    metric::Metric,
    repository::Repository,
    sample::Sample,
};

/// Name of the timestamp column.
pub const TIME_COLUMN: &str = "time";
/// Name of the value column.
pub const VALUE_COLUMN: &str = "value";

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Microseconds since the Unix epoch.
    Time(Timestamp),
    /// A measurement.
    Float(f64),
    /// A label value.
    Text(String),
    /// A label the sample does not carry.
    Null,
}

/// A readable table.
pub trait TableRef: fmt::Debug + Send + Sync {
    /// The table's name.
    fn name(&self) -> &str;

    /// Column names, in row order.
    fn columns(&self) -> &[String];

    /// Position of column `name` in each row.
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns().iter().position(|column| column == name)
    }

    /// Visit every row whose time lies in `[time_begin, time_end)`, stopping
    /// as soon as `visit` returns `false`.
    fn scan(
        &self,
        time_begin: Timestamp,
        time_end: Timestamp,
        visit: &mut dyn FnMut(&[Value]) -> bool,
    );
}

/// A source of tables.
pub trait TableRepository: fmt::Debug + Send + Sync {
    /// Open table `name`, if it exists.
    fn table(&self, name: &str) -> Option<Box<dyn TableRef>>;

    /// Names of every table, sorted.
    fn table_names(&self) -> Vec<String>;
}

/// Exposes each metric of a [`Repository`] as a table.
#[derive(Debug, Clone)]
pub struct MetricTableRepository {
    repository: Arc<Repository>,
}

impl MetricTableRepository {
    /// Create a new [`MetricTableRepository`] over `repository`.
    #[must_use]
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }
}

impl TableRepository for MetricTableRepository {
    fn table(&self, name: &str) -> Option<Box<dyn TableRef>> {
        let metric = self.repository.find(name)?;
        Some(Box::new(MetricTable::new(metric)))
    }

    fn table_names(&self) -> Vec<String> {
        self.repository
            .list()
            .iter()
            .map(|metric| metric.key().to_string())
            .collect()
    }
}

/// A single metric viewed as a table.
///
/// Label columns are fixed when the table is opened. Labels first seen after
/// that do not appear until the table is opened again.
#[derive(Debug)]
pub struct MetricTable {
    metric: Arc<dyn Metric>,
    columns: Vec<String>,
}

impl MetricTable {
    /// Open `metric` as a table.
    #[must_use]
    pub fn new(metric: Arc<dyn Metric>) -> Self {
        let mut columns = vec![TIME_COLUMN.to_string(), VALUE_COLUMN.to_string()];
        columns.extend(metric.labels());
        Self { metric, columns }
    }

    fn fill_row(&self, sample: &Sample, row: &mut Vec<Value>) {
        row.clear();
        row.push(Value::Time(sample.time()));
        row.push(Value::Float(sample.value()));
        for label in &self.columns[2..] {
            row.push(
                sample
                    .label(label)
                    .map_or(Value::Null, |v| Value::Text(v.to_string())),
            );
        }
    }
}

impl TableRef for MetricTable {
    fn name(&self) -> &str {
        self.metric.key()
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn scan(
        &self,
        time_begin: Timestamp,
        time_end: Timestamp,
        visit: &mut dyn FnMut(&[Value]) -> bool,
    ) {
        let mut row = Vec::with_capacity(self.columns.len());
        self.metric.scan_samples(time_begin, time_end, &mut |sample| {
            self.fill_row(&sample, &mut row);
            visit(&row)
        });
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::Arc;

    use super::{MetricTableRepository, TableRef, TableRepository, Value};
    use crate::{
        clock::ManualClock,
        metric::{Backend, Metric},
        repository::Repository,
    };

    fn tables() -> MetricTableRepository {
        let repo = Repository::with_clock(Backend::InMemory, Arc::new(ManualClock::new(0)));
        let cpu = repo.find_or_create("cpu");
        cpu.insert_sample(0.5, vec![("host".into(), "a".into())], Some(1000));
        cpu.insert_sample(
            0.9,
            vec![("zone".into(), "eu".into()), ("host".into(), "b".into())],
            Some(2000),
        );
        repo.find_or_create("mem");
        MetricTableRepository::new(Arc::new(repo))
    }

    #[test]
    fn one_table_per_metric() {
        let tables = tables();
        assert_eq!(tables.table_names(), vec!["cpu", "mem"]);
        assert!(tables.table("disk").is_none());
    }

    #[test]
    fn columns_are_time_value_then_labels() {
        let table = tables().table("cpu").expect("cpu exists");
        assert_eq!(table.name(), "cpu");
        assert_eq!(table.columns(), ["time", "value", "host", "zone"]);
        assert_eq!(table.column_index("zone"), Some(3));
        assert_eq!(table.column_index("dc"), None);
    }

    #[test]
    fn rows_follow_scan() {
        let table = tables().table("cpu").expect("cpu exists");
        let mut rows = Vec::new();
        table.scan(0, 3000, &mut |row| {
            rows.push(row.to_vec());
            true
        });
        assert_eq!(
            rows,
            vec![
                vec![
                    Value::Time(1000),
                    Value::Float(0.5),
                    Value::Text("a".into()),
                    Value::Null,
                ],
                vec![
                    Value::Time(2000),
                    Value::Float(0.9),
                    Value::Text("b".into()),
                    Value::Text("eu".into()),
                ],
            ]
        );

        let mut visits = 0;
        table.scan(0, 3000, &mut |_| {
            visits += 1;
            false
        });
        assert_eq!(visits, 1);
    }

    #[test]
    fn values_serialize_untagged() {
        let row = vec![
            Value::Time(1),
            Value::Float(2.5),
            Value::Text("a".into()),
            Value::Null,
        ];
        assert_eq!(
            serde_json::to_string(&row).expect("serialize"),
            r#"[1,2.5,"a",null]"#
        );
    }
}
