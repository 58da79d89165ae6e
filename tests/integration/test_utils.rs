//! Shared fixtures: an in-memory backend that answers the three facet queries
//! and records every call.

use async_trait::async_trait;
use lazyrows::{ColumnDescription, QueryError, Row, Rows, Runner, SharedRunner};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

pub fn people() -> Rows {
    vec![
        row(json!({"name": "ada", "age": 36})),
        row(json!({"name": "grace", "age": 45})),
        row(json!({"name": "linus", "age": 28})),
    ]
}

pub fn people_columns() -> Vec<ColumnDescription> {
    vec![
        ColumnDescription::new("name", "VARCHAR", true),
        ColumnDescription::new("age", "INTEGER", true),
    ]
}

pub struct FakeBackend {
    rows: Rows,
    columns: Vec<ColumnDescription>,
    fail_suffix: Option<&'static str>,
    /// Artificial latency keyed by a substring of the query text
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeBackend {
    pub fn new(rows: Rows, columns: Vec<ColumnDescription>) -> Self {
        Self {
            rows,
            columns,
            fail_suffix: None,
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn people() -> Self {
        Self::new(people(), people_columns())
    }

    /// Fail every query whose name ends with `suffix` (`_data`, `_length`, `_columns`).
    pub fn failing_on(mut self, suffix: &'static str) -> Self {
        self.fail_suffix = Some(suffix);
        self
    }

    pub fn with_delay(mut self, text_fragment: &str, delay: Duration) -> Self {
        self.delays.insert(text_fragment.to_string(), delay);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(_, name)| name.ends_with(suffix))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn texts(&self, suffix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, name)| name.ends_with(suffix))
            .map(|(text, _)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Runner for FakeBackend {
    async fn run(&self, query_text: &str, query_name: &str) -> Result<Rows, QueryError> {
        self.calls
            .lock()
            .push((query_text.to_string(), query_name.to_string()));

        let delay = self
            .delays
            .iter()
            .find(|(fragment, _)| query_text.contains(fragment.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(suffix) = self.fail_suffix {
            if query_name.ends_with(suffix) {
                return Err(QueryError::runner(format!("backend refused {}", query_name)));
            }
        }

        if query_name.ends_with("_length") {
            Ok(vec![row(json!({ "rowCount": self.rows.len() }))])
        } else if query_name.ends_with("_columns") {
            Ok(self
                .columns
                .iter()
                .map(|c| row(serde_json::to_value(c).unwrap_or(Value::Null)))
                .collect())
        } else {
            Ok(self.rows.clone())
        }
    }
}

pub fn as_runner(backend: &Arc<FakeBackend>) -> SharedRunner {
    backend.clone()
}

/// Let spawned warm-up tasks run on a current-thread runtime.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
