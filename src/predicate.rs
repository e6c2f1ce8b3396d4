use crate::tuple::schema::Schema;
use crate::tuple::Tuple;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Row filter that can be cloned into a transaction's scan set and
/// re-evaluated against concurrent writes during commit validation.
pub trait PredicateMatcher: Send + Sync {
    fn matches(&self, tuple: &Tuple, schema: &Schema) -> bool;
    fn boxed_clone(&self) -> Box<dyn PredicateMatcher>;
}

impl Clone for Box<dyn PredicateMatcher> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

#[derive(Debug, Clone)]
pub struct AlwaysTrue;

impl PredicateMatcher for AlwaysTrue {
    fn matches(&self, _tuple: &Tuple, _schema: &Schema) -> bool {
        true
    }

    fn boxed_clone(&self) -> Box<dyn PredicateMatcher> {
        Box::new(self.clone())
    }
}

/// Compares one column against a constant.
#[derive(Debug, Clone)]
pub struct ColumnValueMatcher {
    column: usize,
    comparison: Comparison,
    value: Value,
}

impl ColumnValueMatcher {
    pub fn new(column: usize, comparison: Comparison, value: Value) -> Self {
        Self {
            column,
            comparison,
            value,
        }
    }
}

impl PredicateMatcher for ColumnValueMatcher {
    fn matches(&self, tuple: &Tuple, schema: &Schema) -> bool {
        let Ok(value) = tuple.value(self.column, schema) else {
            return false;
        };

        let Some(ordering) = value.partial_cmp(&self.value) else {
            return false;
        };

        match self.comparison {
            Comparison::Eq => ordering.is_eq(),
            Comparison::Neq => !ordering.is_eq(),
            Comparison::Lt => ordering.is_lt(),
            Comparison::Le => ordering.is_le(),
            Comparison::Gt => ordering.is_gt(),
            Comparison::Ge => ordering.is_ge(),
        }
    }

    fn boxed_clone(&self) -> Box<dyn PredicateMatcher> {
        Box::new(self.clone())
    }
}

pub struct AndMatcher {
    left: Box<dyn PredicateMatcher>,
    right: Box<dyn PredicateMatcher>,
}

impl AndMatcher {
    pub fn new(left: Box<dyn PredicateMatcher>, right: Box<dyn PredicateMatcher>) -> Self {
        Self { left, right }
    }
}

impl PredicateMatcher for AndMatcher {
    fn matches(&self, tuple: &Tuple, schema: &Schema) -> bool {
        self.left.matches(tuple, schema) && self.right.matches(tuple, schema)
    }

    fn boxed_clone(&self) -> Box<dyn PredicateMatcher> {
        Box::new(AndMatcher {
            left: self.left.clone(),
            right: self.right.clone(),
        })
    }
}

pub struct OrMatcher {
    left: Box<dyn PredicateMatcher>,
    right: Box<dyn PredicateMatcher>,
}

impl OrMatcher {
    pub fn new(left: Box<dyn PredicateMatcher>, right: Box<dyn PredicateMatcher>) -> Self {
        Self { left, right }
    }
}

impl PredicateMatcher for OrMatcher {
    fn matches(&self, tuple: &Tuple, schema: &Schema) -> bool {
        self.left.matches(tuple, schema) || self.right.matches(tuple, schema)
    }

    fn boxed_clone(&self) -> Box<dyn PredicateMatcher> {
        Box::new(OrMatcher {
            left: self.left.clone(),
            right: self.right.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::schema::{Column, Schema};
    use crate::types::Type;
    use anyhow::Result;

    fn users() -> Schema {
        Schema::new(
            "users",
            vec![Column::new("id", Type::Int), Column::new("age", Type::Int)],
        )
    }

    fn user(id: i32, age: i32) -> Tuple {
        Tuple::new(&[Value::Int(id), Value::Int(age)], &users()).unwrap()
    }

    #[test]
    fn test_column_value_comparisons() {
        let schema = users();
        let minor = ColumnValueMatcher::new(1, Comparison::Lt, Value::Int(18));

        assert!(minor.matches(&user(1, 10), &schema));
        assert!(!minor.matches(&user(2, 30), &schema));
        assert!(!minor.matches(&user(3, 18), &schema));
    }

    #[test]
    fn test_and_or_compose() {
        let schema = users();
        let both = AndMatcher::new(
            Box::new(ColumnValueMatcher::new(1, Comparison::Ge, Value::Int(18))),
            Box::new(ColumnValueMatcher::new(0, Comparison::Eq, Value::Int(1))),
        );
        assert!(both.matches(&user(1, 20), &schema));
        assert!(!both.matches(&user(2, 20), &schema));

        let either = OrMatcher::new(
            Box::new(ColumnValueMatcher::new(1, Comparison::Lt, Value::Int(18))),
            Box::new(ColumnValueMatcher::new(0, Comparison::Eq, Value::Int(2))),
        );
        assert!(either.matches(&user(2, 40), &schema));
        assert!(!either.matches(&user(3, 40), &schema));
    }

    #[test]
    fn test_clone_keeps_behavior() -> Result<()> {
        let schema = users();
        let matcher: Box<dyn PredicateMatcher> =
            Box::new(ColumnValueMatcher::new(1, Comparison::Lt, Value::Int(18)));
        let cloned = matcher.clone();

        assert_eq!(
            matcher.matches(&user(1, 10), &schema),
            cloned.matches(&user(1, 10), &schema)
        );
        Ok(())
    }
}
