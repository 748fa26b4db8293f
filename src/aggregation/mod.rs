//! Grouped aggregations
//!
//! An [`AggregationBuilder`] holds a group key, an optional pre-filter and an
//! ordered set of named outputs, each computed by an [`AggFunction`] over a
//! source field. It serializes into a `$match` + `$group` pipeline.
//!
//! ```rust
//! use querier::{AggFunction, AggregationBuilder, NamedAgg};
//!
//! let mut builder = AggregationBuilder::groupby("place.country_code")?;
//! builder.agg([
//!     ("tweets", NamedAgg::new("id", AggFunction::Count)),
//!     ("avg_favorites", NamedAgg::parse("favorite_count", "mean")?),
//! ])?;
//!
//! let pipeline = builder.serialize();
//! assert!(pipeline.stages[0].contains_key("$group"));
//! # Ok::<(), querier::QuerierError>(())
//! ```

use std::str::FromStr;

use bson::{Bson, Document, doc};

use crate::error::{AggregationError, Result};
use crate::filter::{Filter, validate_field_path};

/// Output field holding the group key in every result record.
pub const GROUP_KEY_FIELD: &str = "_id";

/// Aggregation function applied to each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunction {
    First,
    Last,
    Count,
    Sum,
    Mean,
    Min,
    Max,
    /// Population standard deviation.
    Std,
    /// All values, in encounter order.
    List,
    /// Distinct values.
    Unique,
}

impl AggFunction {
    /// Accumulator expression for `$group`.
    pub fn accumulator(&self, source: &str) -> Document {
        let field = format!("${source}");
        match self {
            AggFunction::First => doc! { "$first": field },
            AggFunction::Last => doc! { "$last": field },
            AggFunction::Count => doc! { "$sum": 1 },
            AggFunction::Sum => doc! { "$sum": field },
            AggFunction::Mean => doc! { "$avg": field },
            AggFunction::Min => doc! { "$min": field },
            AggFunction::Max => doc! { "$max": field },
            AggFunction::Std => doc! { "$stdDevPop": field },
            AggFunction::List => doc! { "$push": field },
            AggFunction::Unique => doc! { "$addToSet": field },
        }
    }
}

impl FromStr for AggFunction {
    type Err = AggregationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(AggFunction::First),
            "last" => Ok(AggFunction::Last),
            "count" | "size" => Ok(AggFunction::Count),
            "sum" => Ok(AggFunction::Sum),
            "mean" | "avg" | "average" => Ok(AggFunction::Mean),
            "min" => Ok(AggFunction::Min),
            "max" => Ok(AggFunction::Max),
            "std" => Ok(AggFunction::Std),
            "list" => Ok(AggFunction::List),
            "unique" => Ok(AggFunction::Unique),
            _ => Err(AggregationError::UnknownFunction(s.to_string())),
        }
    }
}

/// Source field plus aggregation function for one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAgg {
    pub column: String,
    pub function: AggFunction,
}

impl NamedAgg {
    pub fn new(column: impl Into<String>, function: AggFunction) -> Self {
        Self {
            column: column.into(),
            function,
        }
    }

    /// Resolve the function by name (`"sum"`, `"mean"`, ...).
    pub fn parse(column: impl Into<String>, function: &str) -> Result<Self> {
        Ok(Self::new(column, function.parse::<AggFunction>()?))
    }
}

impl<C: Into<String>> From<(C, AggFunction)> for NamedAgg {
    fn from((column, function): (C, AggFunction)) -> Self {
        NamedAgg::new(column, function)
    }
}

/// Execution flags passed alongside the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Let the server spill large groupings to disk.
    pub allow_disk_use: bool,
}

/// Serialized aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Document>,
    pub options: EngineOptions,
}

/// Group key plus named outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationBuilder {
    group_key: String,
    outputs: Vec<(String, NamedAgg)>,
    pre_filter: Option<Filter>,
    options: EngineOptions,
}

impl AggregationBuilder {
    /// Start a grouping on `field`.
    pub fn groupby(field: &str) -> Result<Self> {
        validate_field_path(field).map_err(AggregationError::InvalidGroupKey)?;
        Ok(Self {
            group_key: field.to_string(),
            outputs: Vec::new(),
            pre_filter: None,
            options: EngineOptions::default(),
        })
    }

    /// Filter applied before grouping.
    pub fn pre_filter(&mut self, filter: Filter) -> &mut Self {
        self.pre_filter = Some(filter);
        self
    }

    pub fn allow_disk_use(&mut self, allow: bool) -> &mut Self {
        self.options.allow_disk_use = allow;
        self
    }

    /// Add named outputs.
    ///
    /// Names must be unique across calls. If any entry is rejected, none of
    /// the entries of this call are added.
    pub fn agg<I, N, A>(&mut self, outputs: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (N, A)>,
        N: Into<String>,
        A: Into<NamedAgg>,
    {
        let mut staged: Vec<(String, NamedAgg)> = Vec::new();

        for (name, named) in outputs {
            let name = name.into();
            let named = named.into();
            validate_output_name(&name)?;
            validate_field_path(&named.column).map_err(AggregationError::InvalidSourceField)?;

            let taken = self.outputs.iter().chain(staged.iter()).any(|(n, _)| *n == name);
            if taken {
                return Err(AggregationError::DuplicateOutput(name).into());
            }
            staged.push((name, named));
        }

        self.outputs.extend(staged);
        Ok(self)
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&str, &NamedAgg)> {
        self.outputs.iter().map(|(name, named)| (name.as_str(), named))
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// `$match` (if the pre-filter has conditions) followed by `$group`.
    pub fn serialize(&self) -> Pipeline {
        let mut stages = Vec::with_capacity(2);
        if let Some(stage) = self.match_stage() {
            stages.push(stage);
        }
        stages.push(self.group_stage());

        Pipeline {
            stages,
            options: self.options,
        }
    }

    /// Pipeline grouping across several collections.
    ///
    /// Runs on the first collection; every other collection is pulled in
    /// with `$unionWith`, each pre-filtered the same way, before grouping.
    pub fn pipeline_over<S: AsRef<str>>(&self, collections: &[S]) -> Pipeline {
        let mut stages = Vec::with_capacity(collections.len() + 1);
        let match_stage = self.match_stage();

        if let Some(stage) = &match_stage {
            stages.push(stage.clone());
        }
        for collection in collections.iter().skip(1) {
            let inner: Vec<Document> = match_stage.iter().cloned().collect();
            stages.push(doc! {
                "$unionWith": { "coll": collection.as_ref(), "pipeline": inner }
            });
        }
        stages.push(self.group_stage());

        Pipeline {
            stages,
            options: self.options,
        }
    }

    fn match_stage(&self) -> Option<Document> {
        self.pre_filter
            .as_ref()
            .filter(|f| !f.is_empty())
            .map(|f| doc! { "$match": f.serialize() })
    }

    fn group_stage(&self) -> Document {
        let mut group = doc! { GROUP_KEY_FIELD: format!("${}", self.group_key) };
        for (name, named) in &self.outputs {
            group.insert(name.clone(), Bson::Document(named.function.accumulator(&named.column)));
        }
        doc! { "$group": group }
    }
}

fn validate_output_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('$') || name.contains('.') || name == GROUP_KEY_FIELD
    {
        return Err(AggregationError::InvalidOutputName(name.to_string()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuerierError;

    #[test]
    fn test_group_with_count() {
        let mut builder = AggregationBuilder::groupby("lang").unwrap();
        builder
            .agg([("tweets", NamedAgg::new("id", AggFunction::Count))])
            .unwrap();

        let pipeline = builder.serialize();
        assert_eq!(
            pipeline.stages,
            vec![doc! { "$group": { "_id": "$lang", "tweets": { "$sum": 1 } } }]
        );
        assert!(!pipeline.options.allow_disk_use);
    }

    #[test]
    fn test_pre_filter_becomes_match() {
        let mut filter = Filter::new();
        filter.greater_than("favorite_count", 10).unwrap();

        let mut builder = AggregationBuilder::groupby("user.id").unwrap();
        builder
            .pre_filter(filter)
            .allow_disk_use(true)
            .agg([
                ("favs", ("favorite_count", AggFunction::Sum)),
                ("first_text", ("text", AggFunction::First)),
            ])
            .unwrap();

        let pipeline = builder.serialize();
        assert_eq!(
            pipeline.stages,
            vec![
                doc! { "$match": { "favorite_count": { "$gt": 10 } } },
                doc! { "$group": {
                    "_id": "$user.id",
                    "favs": { "$sum": "$favorite_count" },
                    "first_text": { "$first": "$text" },
                } },
            ]
        );
        assert!(pipeline.options.allow_disk_use);
    }

    #[test]
    fn test_empty_pre_filter_is_skipped() {
        let mut builder = AggregationBuilder::groupby("lang").unwrap();
        builder.pre_filter(Filter::new());
        assert_eq!(builder.serialize().stages.len(), 1);
    }

    #[test]
    fn test_duplicate_output_across_calls() {
        let mut builder = AggregationBuilder::groupby("lang").unwrap();
        builder.agg([("n", NamedAgg::new("id", AggFunction::Count))]).unwrap();

        let err = builder
            .agg([
                ("m", NamedAgg::new("id", AggFunction::Max)),
                ("n", NamedAgg::new("id", AggFunction::Min)),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            QuerierError::Aggregation(AggregationError::DuplicateOutput(ref n)) if n == "n"
        ));
        // Rejected call leaves the builder untouched.
        assert_eq!(builder.outputs().count(), 1);
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        let mut builder = AggregationBuilder::groupby("lang").unwrap();
        for name in ["_id", "", "$total", "a.b"] {
            let err = builder
                .agg([(name, NamedAgg::new("id", AggFunction::Count))])
                .unwrap_err();
            assert!(matches!(
                err,
                QuerierError::Aggregation(AggregationError::InvalidOutputName(_))
            ));
        }
    }

    #[test]
    fn test_invalid_group_key() {
        let err = AggregationBuilder::groupby("").unwrap_err();
        assert!(matches!(
            err,
            QuerierError::Aggregation(AggregationError::InvalidGroupKey(_))
        ));
    }

    #[test]
    fn test_function_names() {
        assert_eq!("mean".parse::<AggFunction>().unwrap(), AggFunction::Mean);
        assert_eq!("AVG".parse::<AggFunction>().unwrap(), AggFunction::Mean);
        assert_eq!(
            AggFunction::Unique.accumulator("tag"),
            doc! { "$addToSet": "$tag" }
        );
        let err = NamedAgg::parse("x", "median").unwrap_err();
        assert!(matches!(
            err,
            QuerierError::Aggregation(AggregationError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_pipeline_over_collections() {
        let mut filter = Filter::new();
        filter.equals("lang", "es").unwrap();
        let mut builder = AggregationBuilder::groupby("place.country").unwrap();
        builder
            .pre_filter(filter)
            .agg([("n", NamedAgg::new("id", AggFunction::Count))])
            .unwrap();

        let pipeline = builder.pipeline_over(&["europe", "asia"]);
        assert_eq!(pipeline.stages.len(), 3);
        assert_eq!(
            pipeline.stages[1],
            doc! { "$unionWith": {
                "coll": "asia",
                "pipeline": [ { "$match": { "lang": { "$eq": "es" } } } ],
            } }
        );

        let single = builder.pipeline_over(&["europe"]);
        assert_eq!(single, builder.serialize());
    }
}
