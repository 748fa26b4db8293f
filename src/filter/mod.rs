//! Declarative filter construction
//!
//! A [`Filter`] accumulates conditions that are combined with logical AND and
//! serialized into a MongoDB predicate document. Nested fields are addressed
//! with dot notation (`place.country_code`).
//!
//! ```rust
//! use querier::Filter;
//!
//! let mut filter = Filter::new();
//! filter
//!     .greater_than("x", 0)?
//!     .less_or_equals("x", 100)?
//!     .any_of("place.country_code", ["ES", "FR", "PT"])?;
//!
//! let query = filter.serialize();
//! assert_eq!(query.get_document("x")?.len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod geo;

pub use geo::{GeoType, Geometry, Point};

use std::fmt;

use bson::{Bson, Document, doc};
use chrono::{DateTime, Utc};

use crate::error::{FilterError, Result};

/// Comparison operator applied to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    LessThan,
    LessOrEquals,
    GreaterThan,
    GreaterOrEquals,
    Exists,
    AnyOf,
    NoneOf,
    GeoWithin,
}

impl Operator {
    /// MongoDB query operator for this condition.
    pub fn as_mongo(&self) -> &'static str {
        match self {
            Operator::Equals => "$eq",
            Operator::NotEquals => "$ne",
            Operator::LessThan => "$lt",
            Operator::LessOrEquals => "$lte",
            Operator::GreaterThan => "$gt",
            Operator::GreaterOrEquals => "$gte",
            Operator::Exists => "$exists",
            Operator::AnyOf => "$in",
            Operator::NoneOf => "$nin",
            Operator::GeoWithin => "$geoWithin",
        }
    }
}

/// A single `field <op> operand` constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub operand: Bson,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Condition(Condition),
    Or(Box<Filter>, Box<Filter>),
}

/// Conjunction of conditions, built incrementally.
///
/// An empty filter matches every record. Conditions are never removed; the
/// same filter can be serialized and reused for any number of queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    nodes: Vec<Node>,
}

/// Validate a dot-separated field path.
pub(crate) fn validate_field_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() || path.starts_with('$') || path.split('.').any(str::is_empty) {
        return Err(path.to_string());
    }
    Ok(())
}

impl Filter {
    /// Create an empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Match when the field exists.
    pub fn exists(&mut self, field: &str) -> Result<&mut Self> {
        self.push(field, Operator::Exists, Bson::Boolean(true))
    }

    /// Match when the field does not exist.
    pub fn not_exists(&mut self, field: &str) -> Result<&mut Self> {
        self.push(field, Operator::Exists, Bson::Boolean(false))
    }

    /// Match when `field == value`.
    pub fn equals(&mut self, field: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.push(field, Operator::Equals, value.into())
    }

    /// Match when `field != value`.
    pub fn not_equals(&mut self, field: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.push(field, Operator::NotEquals, value.into())
    }

    /// Match when `field < value`.
    pub fn less_than(&mut self, field: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.push(field, Operator::LessThan, value.into())
    }

    /// Match when `field <= value`.
    pub fn less_or_equals(&mut self, field: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.push(field, Operator::LessOrEquals, value.into())
    }

    /// Match when `field > value`.
    pub fn greater_than(&mut self, field: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.push(field, Operator::GreaterThan, value.into())
    }

    /// Match when `field >= value`.
    pub fn greater_or_equals(
        &mut self,
        field: &str,
        value: impl Into<Bson>,
    ) -> Result<&mut Self> {
        self.push(field, Operator::GreaterOrEquals, value.into())
    }

    /// Match when the field equals any of `values`.
    pub fn any_of<I, V>(&mut self, field: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.push(field, Operator::AnyOf, Bson::Array(values))
    }

    /// Match when the field equals none of `values`.
    pub fn none_of<I, V>(&mut self, field: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.push(field, Operator::NoneOf, Bson::Array(values))
    }

    /// Match when the field's location lies within `geometry`.
    ///
    /// A polygon is evaluated precisely on the sphere; a bounding box uses the
    /// cheaper flat `$box` test.
    pub fn geo_within(&mut self, field: &str, geometry: Geometry) -> Result<&mut Self> {
        self.push(field, Operator::GeoWithin, geometry.to_operand())
    }

    /// Match when `from <= field < to`.
    ///
    /// An empty range (`from >= to`) is accepted and simply matches nothing.
    pub fn in_date_range(
        &mut self,
        field: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<&mut Self> {
        self.greater_or_equals(field, bson::DateTime::from_millis(from.timestamp_millis()))?
            .less_than(field, bson::DateTime::from_millis(to.timestamp_millis()))
    }

    /// Combine with `other` by logical OR.
    ///
    /// Both filters must have at least one condition. Conditions added to the
    /// result afterwards are ANDed with the disjunction.
    pub fn or(self, other: Filter) -> Result<Filter> {
        if self.is_empty() || other.is_empty() {
            return Err(FilterError::EmptyDisjunction.into());
        }
        Ok(Filter {
            nodes: vec![Node::Or(Box::new(self), Box::new(other))],
        })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of top-level nodes (conditions and disjunctions).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Top-level conditions in insertion order.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Condition(c) => Some(c),
            Node::Or(..) => None,
        })
    }

    /// Render the predicate document.
    ///
    /// Operators on the same field share one operator document. A repeated
    /// operator on a field is moved to a trailing `$and` instead of
    /// overwriting the earlier one.
    pub fn serialize(&self) -> Document {
        let mut query = Document::new();
        let mut extra: Vec<Bson> = Vec::new();

        for node in &self.nodes {
            match node {
                Node::Condition(c) => {
                    let op = c.operator.as_mongo();
                    match query.get_mut(&c.field) {
                        Some(Bson::Document(ops)) if !ops.contains_key(op) => {
                            ops.insert(op, c.operand.clone());
                        }
                        Some(_) => {
                            extra.push(Bson::Document(doc! { &c.field: { op: c.operand.clone() } }));
                        }
                        None => {
                            query.insert(c.field.clone(), doc! { op: c.operand.clone() });
                        }
                    }
                }
                Node::Or(left, right) => {
                    let branches = vec![
                        Bson::Document(left.serialize()),
                        Bson::Document(right.serialize()),
                    ];
                    if query.contains_key("$or") {
                        extra.push(Bson::Document(doc! { "$or": branches }));
                    } else {
                        query.insert("$or", branches);
                    }
                }
            }
        }

        if !extra.is_empty() {
            query.insert("$and", extra);
        }
        query
    }

    fn push(&mut self, field: &str, operator: Operator, operand: Bson) -> Result<&mut Self> {
        validate_field_path(field).map_err(FilterError::InvalidFieldPath)?;
        self.nodes.push(Node::Condition(Condition {
            field: field.to_string(),
            operator,
            operand,
        }));
        Ok(self)
    }
}

impl From<&Filter> for Document {
    fn from(filter: &Filter) -> Self {
        filter.serialize()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = Bson::Document(self.serialize()).into_relaxed_extjson();
        let text = serde_json::to_string_pretty(&json).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuerierError;
    use chrono::TimeZone;

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = Filter::new();
        assert!(filter.is_empty());
        assert_eq!(filter.serialize(), doc! {});
    }

    #[test]
    fn test_range_on_same_field_combines() {
        let mut filter = Filter::new();
        filter.greater_than("x", 0).unwrap().less_or_equals("x", 100).unwrap();

        assert_eq!(filter.serialize(), doc! { "x": { "$gt": 0, "$lte": 100 } });
    }

    #[test]
    fn test_repeated_operator_not_clobbered() {
        let mut filter = Filter::new();
        filter.not_equals("lang", "es").unwrap().not_equals("lang", "fr").unwrap();

        assert_eq!(
            filter.serialize(),
            doc! {
                "lang": { "$ne": "es" },
                "$and": [ { "lang": { "$ne": "fr" } } ],
            }
        );
    }

    #[test]
    fn test_disjoint_fields_conjunction() {
        let mut a = Filter::new();
        a.equals("lang", "es").unwrap();
        let mut b = Filter::new();
        b.greater_or_equals("favorite_count", 500).unwrap();

        let mut ab = a.clone();
        ab.greater_or_equals("favorite_count", 500).unwrap();
        let mut ba = b.clone();
        ba.equals("lang", "es").unwrap();

        // Document equality ignores key order.
        assert_eq!(ab.serialize(), ba.serialize());
        assert_eq!(
            ab.serialize(),
            doc! { "lang": { "$eq": "es" }, "favorite_count": { "$gte": 500 } }
        );
    }

    #[test]
    fn test_nested_field_path() {
        let mut filter = Filter::new();
        filter.any_of("place.country_code", ["ES", "FR", "PT"]).unwrap();

        assert_eq!(
            filter.serialize(),
            doc! { "place.country_code": { "$in": ["ES", "FR", "PT"] } }
        );
    }

    #[test]
    fn test_exists_and_none_of() {
        let mut filter = Filter::new();
        filter
            .exists("retweeted_status")
            .unwrap()
            .not_exists("deleted")
            .unwrap()
            .none_of("lang", vec!["und"])
            .unwrap();

        assert_eq!(
            filter.serialize(),
            doc! {
                "retweeted_status": { "$exists": true },
                "deleted": { "$exists": false },
                "lang": { "$nin": ["und"] },
            }
        );
    }

    #[test]
    fn test_invalid_field_paths() {
        for path in ["", "a..b", ".a", "a.", "$where"] {
            let err = Filter::new().equals(path, 1).unwrap_err();
            assert!(
                matches!(err, QuerierError::Filter(FilterError::InvalidFieldPath(_))),
                "path {path:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_failed_condition_leaves_filter_unchanged() {
        let mut filter = Filter::new();
        filter.equals("a", 1).unwrap();
        assert!(filter.equals("", 2).is_err());
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_or_filter() {
        let mut retweets = Filter::new();
        retweets.greater_or_equals("retweet_count", 1000).unwrap();
        let mut favorites = Filter::new();
        favorites.greater_or_equals("favorite_count", 500).unwrap();

        let mut filter = retweets.or(favorites).unwrap();
        filter.equals("lang", "es").unwrap();

        assert_eq!(
            filter.serialize(),
            doc! {
                "$or": [
                    { "retweet_count": { "$gte": 1000 } },
                    { "favorite_count": { "$gte": 500 } },
                ],
                "lang": { "$eq": "es" },
            }
        );
    }

    #[test]
    fn test_or_requires_conditions() {
        let mut a = Filter::new();
        a.equals("a", 1).unwrap();
        let err = a.or(Filter::new()).unwrap_err();
        assert!(matches!(err, QuerierError::Filter(FilterError::EmptyDisjunction)));
    }

    #[test]
    fn test_second_or_goes_to_and() {
        let mut a = Filter::new();
        a.equals("a", 1).unwrap();
        let mut b = Filter::new();
        b.equals("b", 1).unwrap();
        let mut c = Filter::new();
        c.equals("c", 1).unwrap();
        let mut d = Filter::new();
        d.equals("d", 1).unwrap();

        let first = a.or(b).unwrap();
        let second = c.or(d).unwrap();
        let mut combined = first.clone();
        combined.nodes.extend(second.nodes.clone());

        let query = combined.serialize();
        assert!(query.contains_key("$or"));
        assert_eq!(query.get_array("$and").unwrap().len(), 1);
    }

    #[test]
    fn test_contradictory_range_is_accepted() {
        let mut filter = Filter::new();
        filter.less_than("x", 0).unwrap().greater_than("x", 10).unwrap();
        assert_eq!(filter.serialize(), doc! { "x": { "$lt": 0, "$gt": 10 } });
    }

    #[test]
    fn test_date_range() {
        let from = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();

        let mut filter = Filter::new();
        filter.in_date_range("created_at", from, to).unwrap();

        let ops = filter.serialize().get_document("created_at").unwrap().clone();
        assert_eq!(
            ops.get_datetime("$gte").unwrap().timestamp_millis(),
            from.timestamp_millis()
        );
        assert!(ops.contains_key("$lt"));

        let mut empty = Filter::new();
        empty.in_date_range("created_at", to, from).unwrap();
        let ops = empty.serialize().get_document("created_at").unwrap().clone();
        assert_eq!(
            ops.get_datetime("$gte").unwrap().timestamp_millis(),
            to.timestamp_millis()
        );
        assert_eq!(
            ops.get_datetime("$lt").unwrap().timestamp_millis(),
            from.timestamp_millis()
        );
    }

    #[test]
    fn test_display_is_json() {
        let mut filter = Filter::new();
        filter.equals("lang", "es").unwrap();
        let text = filter.to_string();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["lang"]["$eq"], "es");
    }
}
