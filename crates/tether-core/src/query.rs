//! Predicate filter: a small MongoDB-style query language evaluated against
//! event payloads.
//!
//! A query is compiled once with [`Query::compile`] and then evaluated with
//! [`Query::matches`]. Supported forms:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `{"$gte": 0}` | operator document applied to the payload itself |
//! | `{"user.age": {"$lt": 18}}` | operator document applied to a dotted path |
//! | `{"kind": "alert"}` | implicit equality |
//! | `{"$or": [q, q]}` | logical combinators `$and`, `$or`, `$nor` |
//!
//! Comparison operators: `$eq $ne $gt $gte $lt $lte $in $nin $exists $size
//! $regex $not`. Ordering only succeeds between two numbers or two strings.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

/// Errors raised while compiling a query.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// An operator key that the filter does not implement.
    #[error("unknown query operator '{0}'")]
    UnknownOperator(String),

    /// An operator was given an operand of the wrong shape.
    #[error("operator '{operator}' expects {expected}")]
    InvalidOperand {
        /// The offending operator.
        operator: String,
        /// Description of the accepted operand.
        expected: &'static str,
    },

    /// A `$regex` pattern failed to compile.
    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),
}

/// A compiled predicate.
#[derive(Clone, Debug)]
pub struct Query {
    source: Value,
    root: Node,
}

#[derive(Clone, Debug)]
enum Node {
    All(Vec<Node>),
    Field { path: Vec<String>, test: Test },
}

#[derive(Clone, Debug)]
enum Test {
    Equals(Value),
    Ops(Vec<Op>),
}

#[derive(Clone, Debug)]
enum Op {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Size(usize),
    Regex(Regex),
    Not(Vec<Op>),
    And(Vec<Node>),
    Or(Vec<Node>),
    Nor(Vec<Node>),
}

impl Query {
    /// Compile a query document.
    pub fn compile(source: &Value) -> Result<Self, QueryError> {
        let root = match source {
            Value::Object(doc) => compile_document(doc, &[])?,
            other => Node::Field {
                path: Vec::new(),
                test: Test::Equals(other.clone()),
            },
        };
        Ok(Self {
            source: source.clone(),
            root,
        })
    }

    /// The document this query was compiled from.
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Whether `payload` satisfies the query.
    pub fn matches(&self, payload: &Value) -> bool {
        self.root.eval(payload)
    }
}

fn is_operator_document(doc: &Map<String, Value>) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

fn compile_document(doc: &Map<String, Value>, base: &[String]) -> Result<Node, QueryError> {
    let mut parts = Vec::new();
    let mut ops = Vec::new();
    for (key, operand) in doc {
        if key.starts_with('$') {
            ops.push(compile_operator(key, operand)?);
            continue;
        }
        let mut path = base.to_vec();
        path.extend(key.split('.').map(str::to_owned));
        let test = match operand {
            Value::Object(inner) if is_operator_document(inner) => Test::Ops(
                inner
                    .iter()
                    .map(|(k, v)| compile_operator(k, v))
                    .collect::<Result<_, _>>()?,
            ),
            literal => Test::Equals(literal.clone()),
        };
        parts.push(Node::Field { path, test });
    }
    if !ops.is_empty() {
        parts.push(Node::Field {
            path: base.to_vec(),
            test: Test::Ops(ops),
        });
    }
    Ok(match parts.len() {
        1 => parts.remove(0),
        _ => Node::All(parts),
    })
}

fn compile_operator(op: &str, operand: &Value) -> Result<Op, QueryError> {
    let invalid = |expected| QueryError::InvalidOperand {
        operator: op.to_owned(),
        expected,
    };
    Ok(match op {
        "$eq" => Op::Eq(operand.clone()),
        "$ne" => Op::Ne(operand.clone()),
        "$gt" => Op::Cmp(Ordering::Greater, false, operand.clone()),
        "$gte" => Op::Cmp(Ordering::Greater, true, operand.clone()),
        "$lt" => Op::Cmp(Ordering::Less, false, operand.clone()),
        "$lte" => Op::Cmp(Ordering::Less, true, operand.clone()),
        "$in" | "$nin" => {
            let list = operand.as_array().ok_or_else(|| invalid("an array"))?.clone();
            if op == "$in" { Op::In(list) } else { Op::Nin(list) }
        }
        "$exists" => Op::Exists(operand.as_bool().ok_or_else(|| invalid("a boolean"))?),
        "$size" => Op::Size(
            operand
                .as_u64()
                .ok_or_else(|| invalid("a non-negative integer"))? as usize,
        ),
        "$regex" => {
            let pattern = operand.as_str().ok_or_else(|| invalid("a string"))?;
            Op::Regex(Regex::new(pattern).map_err(|e| QueryError::InvalidRegex(e.to_string()))?)
        }
        "$not" => match operand {
            Value::Object(inner) if is_operator_document(inner) => Op::Not(
                inner
                    .iter()
                    .map(|(k, v)| compile_operator(k, v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::String(pattern) => Op::Not(vec![Op::Regex(
                Regex::new(pattern).map_err(|e| QueryError::InvalidRegex(e.to_string()))?,
            )]),
            _ => return Err(invalid("an operator document or a regex string")),
        },
        "$and" | "$or" | "$nor" => {
            let queries = operand
                .as_array()
                .filter(|a| !a.is_empty())
                .ok_or_else(|| invalid("a non-empty array of queries"))?;
            let nodes = queries
                .iter()
                .map(|q| match q {
                    Value::Object(doc) => compile_document(doc, &[]),
                    other => Ok(Node::Field {
                        path: Vec::new(),
                        test: Test::Equals(other.clone()),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            match op {
                "$and" => Op::And(nodes),
                "$or" => Op::Or(nodes),
                _ => Op::Nor(nodes),
            }
        }
        other => return Err(QueryError::UnknownOperator(other.to_owned())),
    })
}

impl Node {
    fn eval(&self, ctx: &Value) -> bool {
        match self {
            Self::All(nodes) => nodes.iter().all(|n| n.eval(ctx)),
            Self::Field { path, test } => {
                let resolved = resolve(ctx, path);
                match test {
                    Test::Equals(expected) => equals_or_contains(resolved, expected),
                    Test::Ops(ops) => ops.iter().all(|op| op.eval(resolved)),
                }
            }
        }
    }
}

impl Op {
    fn eval(&self, value: Option<&Value>) -> bool {
        match self {
            Self::Eq(expected) => equals_or_contains(value, expected),
            Self::Ne(expected) => !equals_or_contains(value, expected),
            Self::Cmp(direction, inclusive, operand) => any_element(value, |v| {
                compare(v, operand).is_some_and(|ord| {
                    ord == *direction || (*inclusive && ord == Ordering::Equal)
                })
            }),
            Self::In(list) => list.iter().any(|x| equals_or_contains(value, x)),
            Self::Nin(list) => !list.iter().any(|x| equals_or_contains(value, x)),
            Self::Exists(expected) => value.is_some() == *expected,
            Self::Size(n) => value.and_then(Value::as_array).is_some_and(|a| a.len() == *n),
            Self::Regex(re) => any_element(value, |v| v.as_str().is_some_and(|s| re.is_match(s))),
            Self::Not(ops) => !ops.iter().all(|op| op.eval(value)),
            Self::And(nodes) => {
                let ctx = value.unwrap_or(&Value::Null);
                nodes.iter().all(|n| n.eval(ctx))
            }
            Self::Or(nodes) => {
                let ctx = value.unwrap_or(&Value::Null);
                nodes.iter().any(|n| n.eval(ctx))
            }
            Self::Nor(nodes) => {
                let ctx = value.unwrap_or(&Value::Null);
                !nodes.iter().any(|n| n.eval(ctx))
            }
        }
    }
}

fn resolve<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Apply `pred` to a scalar, or to any element when the value is an array.
fn any_element(value: Option<&Value>, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(v) => pred(v),
        None => false,
    }
}

fn equals_or_contains(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(v) if values_equal(v, expected) => true,
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, expected)),
        Some(_) => false,
    }
}

/// Structural equality that treats `1` and `1.0` as equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
