//! Builders for the JSON filter expressions list endpoints accept.
//!
//! Filters are sent opaquely in the `X-Filter` header; this module only
//! helps produce well-formed ones.
//!
//! ```
//! use cirrus::filter::{Comparison, Filter, Operator, Order};
//!
//! let filter = Filter::or([
//!     Comparison::eq("id", 42),
//!     Comparison::eq("id", 43),
//! ])
//! .order_by("created", Order::Desc);
//!
//! assert_eq!(
//!     filter.to_value(),
//!     serde_json::json!({
//!         "+or": [{"id": 42}, {"id": 43}],
//!         "+order_by": "created",
//!         "+order": "desc",
//!     })
//! );
//!
//! let recent = Comparison::new("id", Operator::Gte, 100);
//! assert_eq!(recent.to_value(), serde_json::json!({"id": {"+gte": 100}}));
//! ```

use serde_json::{Map, Value};
use std::fmt;

/// A column comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Substring match.
    Contains,
}

impl Operator {
    /// The wire spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "+eq",
            Operator::Neq => "+neq",
            Operator::Gt => "+gt",
            Operator::Gte => "+gte",
            Operator::Lt => "+lt",
            Operator::Lte => "+lte",
            Operator::Contains => "+contains",
        }
    }
}

/// How child nodes of a [`Filter`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logical {
    /// All children must match.
    And,
    /// Any child may match.
    Or,
}

impl Logical {
    fn as_str(&self) -> &'static str {
        match self {
            Logical::And => "+and",
            Logical::Or => "+or",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Order {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    /// The wire spelling of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

/// A single `column <op> value` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Column (field path) being compared.
    pub column: String,
    /// The comparison operator.
    pub operator: Operator,
    /// The value compared against.
    pub value: Value,
}

impl Comparison {
    /// Creates a comparison.
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    /// Shorthand for an equality comparison.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// Renders the clause. Equality uses the compact `{"col": value}` form.
    pub fn to_value(&self) -> Value {
        let inner = match self.operator {
            Operator::Eq => self.value.clone(),
            op => {
                let mut m = Map::new();
                m.insert(op.as_str().to_string(), self.value.clone());
                Value::Object(m)
            }
        };
        let mut m = Map::new();
        m.insert(self.column.clone(), inner);
        Value::Object(m)
    }
}

/// A node in a filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// A leaf comparison.
    Comparison(Comparison),
    /// A nested logical group.
    Filter(Filter),
}

impl FilterNode {
    fn to_value(&self) -> Value {
        match self {
            FilterNode::Comparison(c) => c.to_value(),
            FilterNode::Filter(f) => f.to_value(),
        }
    }
}

impl From<Comparison> for FilterNode {
    fn from(c: Comparison) -> Self {
        FilterNode::Comparison(c)
    }
}

impl From<Filter> for FilterNode {
    fn from(f: Filter) -> Self {
        FilterNode::Filter(f)
    }
}

/// A logical group of filter nodes with an optional sort order.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    operator: Logical,
    children: Vec<FilterNode>,
    order_by: Option<(String, Order)>,
}

impl Filter {
    /// All of `children` must match.
    pub fn and<I, N>(children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<FilterNode>,
    {
        Self::group(Logical::And, children)
    }

    /// Any of `children` may match.
    pub fn or<I, N>(children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<FilterNode>,
    {
        Self::group(Logical::Or, children)
    }

    fn group<I, N>(operator: Logical, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<FilterNode>,
    {
        Self {
            operator,
            children: children.into_iter().map(Into::into).collect(),
            order_by: None,
        }
    }

    /// Sorts results by `column`.
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    /// The child nodes.
    pub fn children(&self) -> &[FilterNode] {
        &self.children
    }

    /// Renders the filter as JSON.
    pub fn to_value(&self) -> Value {
        let mut m = Map::new();
        m.insert(
            self.operator.as_str().to_string(),
            Value::Array(self.children.iter().map(FilterNode::to_value).collect()),
        );
        if let Some((column, order)) = &self.order_by {
            m.insert("+order_by".to_string(), Value::String(column.clone()));
            m.insert("+order".to_string(), Value::String(order.as_str().to_string()));
        }
        Value::Object(m)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equality_is_compact() {
        assert_eq!(Comparison::eq("label", "web").to_value(), json!({"label": "web"}));
        assert_eq!(Comparison::eq("id", 7).to_value(), json!({"id": 7}));
    }

    #[test]
    fn test_operators_nest_under_column() {
        let c = Comparison::new("label", Operator::Contains, "web");
        assert_eq!(c.to_value(), json!({"label": {"+contains": "web"}}));
        let c = Comparison::new("size", Operator::Lt, 10);
        assert_eq!(c.to_value(), json!({"size": {"+lt": 10}}));
    }

    #[test]
    fn test_nested_groups() {
        let filter = Filter::and::<_, FilterNode>([
            Comparison::eq("region", "us-east").into(),
            Filter::or([Comparison::eq("id", 1), Comparison::eq("id", 2)]).into(),
        ]);
        assert_eq!(
            filter.to_value(),
            json!({"+and": [{"region": "us-east"}, {"+or": [{"id": 1}, {"id": 2}]}]})
        );
        assert_eq!(filter.children().len(), 2);
    }
}
