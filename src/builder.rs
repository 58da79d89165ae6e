//! SQL builder seam.
//!
//! Queries only need to clone a builder, render it, and apply a handful of
//! fluent mutators. [`SqlBuilder`] is that contract; [`SelectBuilder`] is the
//! minimal implementation used to wrap raw query text.

use std::fmt;

/// Alias given to a raw text query when it is wrapped as a subquery.
pub const INPUT_QUERY_ALIAS: &str = "input_query";

/// One item of a select list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub expr: String,
    pub alias: Option<String>,
}

impl Projection {
    /// `*`
    pub fn all() -> Self {
        Self {
            expr: "*".to_string(),
            alias: None,
        }
    }

    pub fn column(name: &str) -> Self {
        Self {
            expr: quote_identifier(name),
            alias: None,
        }
    }

    pub fn aliased(expr: impl Into<String>, alias: &str) -> Self {
        Self {
            expr: expr.into(),
            alias: Some(alias.to_string()),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.expr, quote_identifier(alias)),
            None => f.write_str(&self.expr),
        }
    }
}

/// Contract a query builder must satisfy.
pub trait SqlBuilder: Send + Sync + fmt::Debug {
    fn clone_box(&self) -> Box<dyn SqlBuilder>;

    /// Render the builder as SQL text.
    fn render(&self) -> String;

    /// Add a `WHERE` predicate, combined with existing ones by `AND`.
    fn filter(&mut self, predicate: &str);

    fn limit(&mut self, n: u64);

    fn offset(&mut self, n: u64);

    /// Append to the select list.
    fn select(&mut self, items: &[Projection]);

    /// Replace the select list.
    fn replace_select(&mut self, items: &[Projection]);

    /// Replace the grouping columns.
    fn group_by(&mut self, columns: &[String]);

    fn order_by(&mut self, expr: &str);
}

impl Clone for Box<dyn SqlBuilder> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectBuilder {
    source: String,
    projections: Vec<Projection>,
    predicates: Vec<String>,
    grouping: Vec<String>,
    ordering: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectBuilder {
    /// Select from an arbitrary `FROM` item.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            projections: Vec::new(),
            predicates: Vec::new(),
            grouping: Vec::new(),
            ordering: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Wrap raw query text: `SELECT * FROM (<text>) AS "input_query"`.
    pub fn from_text(text: &str) -> Self {
        let mut builder = Self::from_source(format!(
            "({}) AS {}",
            clean_query(text),
            quote_identifier(INPUT_QUERY_ALIAS)
        ));
        builder.projections.push(Projection::all());
        builder
    }

    /// Select from a named table.
    pub fn from_table(table: &str) -> Self {
        let mut builder = Self::from_source(quote_identifier(table));
        builder.projections.push(Projection::all());
        builder
    }
}

impl SqlBuilder for SelectBuilder {
    fn clone_box(&self) -> Box<dyn SqlBuilder> {
        Box::new(self.clone())
    }

    fn render(&self) -> String {
        let projections = if self.projections.is_empty() {
            "*".to_string()
        } else {
            self.projections
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", projections, self.source);
        if !self.predicates.is_empty() {
            let predicates = self
                .predicates
                .iter()
                .map(|p| format!("({})", p))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {}", predicates));
        }
        if !self.grouping.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", self.grouping.join(", ")));
        }
        if !self.ordering.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.ordering.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    fn filter(&mut self, predicate: &str) {
        self.predicates.push(predicate.trim().to_string());
    }

    fn limit(&mut self, n: u64) {
        self.limit = Some(n);
    }

    fn offset(&mut self, n: u64) {
        self.offset = Some(n);
    }

    fn select(&mut self, items: &[Projection]) {
        self.projections.extend_from_slice(items);
    }

    fn replace_select(&mut self, items: &[Projection]) {
        self.projections = items.to_vec();
    }

    fn group_by(&mut self, columns: &[String]) {
        self.grouping = columns.iter().map(|c| quote_identifier(c)).collect();
    }

    fn order_by(&mut self, expr: &str) {
        self.ordering.push(expr.trim().to_string());
    }
}

/// Normalize raw query text: trim whitespace and drop trailing semicolons.
pub fn clean_query(text: &str) -> String {
    text.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, escaping embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
