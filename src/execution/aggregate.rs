// Aggregate accumulators: one per aggregate expression per group.

use std::collections::HashSet;

use crate::error::Result;
use crate::execution::expression::Value;
use crate::execution::solution::format_double;
use crate::sparql::AggregateFunction;

enum State {
    Count(u64),
    Sum(SumState),
    Avg(SumState, u64),
    Min(Option<Value>),
    Max(Option<Value>),
    Sample(Option<Value>),
    GroupConcat(Vec<String>),
}

#[derive(Clone, Copy)]
enum SumState {
    Int(i64),
    Dbl(f64),
}

impl SumState {
    fn add(self, v: &Value) -> Option<SumState> {
        let (vi, vd) = match v {
            Value::Integer(i) => (Some(*i), *i as f64),
            Value::Double(d) => (None, *d),
            Value::Literal { .. } => match numeric_of(v)? {
                NumericKind::Int(i) => (Some(i), i as f64),
                NumericKind::Dbl(d) => (None, d),
            },
            _ => return None,
        };
        Some(match (self, vi) {
            (SumState::Int(acc), Some(i)) => match acc.checked_add(i) {
                Some(sum) => SumState::Int(sum),
                None => SumState::Dbl(acc as f64 + i as f64),
            },
            (SumState::Int(acc), None) => SumState::Dbl(acc as f64 + vd),
            (SumState::Dbl(acc), _) => SumState::Dbl(acc + vd),
        })
    }

    fn value(self) -> Value {
        match self {
            SumState::Int(i) => Value::Integer(i),
            SumState::Dbl(d) => Value::Double(d),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            SumState::Int(i) => i as f64,
            SumState::Dbl(d) => d,
        }
    }
}

enum NumericKind {
    Int(i64),
    Dbl(f64),
}

fn numeric_of(v: &Value) -> Option<NumericKind> {
    match v {
        Value::Integer(i) => Some(NumericKind::Int(*i)),
        Value::Double(d) => Some(NumericKind::Dbl(*d)),
        Value::Literal {
            value,
            lang: None,
            datatype: Some(dt),
        } => {
            if dt.ends_with("#integer") || dt.ends_with("#long") || dt.ends_with("#int") {
                value.parse().ok().map(NumericKind::Int)
            } else if dt.ends_with("#decimal") || dt.ends_with("#double") || dt.ends_with("#float")
            {
                value.parse().ok().map(NumericKind::Dbl)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn string_of(v: &Value) -> String {
    match v {
        Value::Iri(iri) => iri.clone(),
        Value::Blank(label) => label.clone(),
        Value::Literal { value, .. } => value.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Double(d) => format_double(*d),
        Value::Boolean(b) => b.to_string(),
    }
}

fn order_key(v: &Value) -> (u8, String, String) {
    match numeric_of(v) {
        Some(NumericKind::Int(i)) => (0, String::new(), format!("{i:+021}")),
        Some(NumericKind::Dbl(d)) => (0, String::new(), format!("{:+024.6}", d)),
        None => match v {
            Value::Blank(label) => (1, String::new(), label.clone()),
            Value::Iri(iri) => (2, String::new(), iri.clone()),
            other => (3, String::new(), string_of(other)),
        },
    }
}

/// One accumulator per aggregate expression per group.
pub struct Accumulator {
    distinct: bool,
    separator: Option<String>,
    seen: HashSet<String>,
    state: State,
    failed: bool,
}

impl Accumulator {
    pub fn new(function: AggregateFunction, distinct: bool, separator: Option<String>) -> Self {
        let state = match function {
            AggregateFunction::Count => State::Count(0),
            AggregateFunction::Sum => State::Sum(SumState::Int(0)),
            AggregateFunction::Avg => State::Avg(SumState::Int(0), 0),
            AggregateFunction::Min => State::Min(None),
            AggregateFunction::Max => State::Max(None),
            AggregateFunction::Sample => State::Sample(None),
            AggregateFunction::GroupConcat => State::GroupConcat(Vec::new()),
        };
        Self {
            distinct,
            separator,
            seen: HashSet::new(),
            state,
            failed: false,
        }
    }

    /// `COUNT(*)` counts rows regardless of bindings.
    pub fn update_star(&mut self) {
        if let State::Count(n) = &mut self.state {
            *n += 1;
        }
    }

    pub fn update(&mut self, value: &Value) -> Result<()> {
        if self.failed {
            return Ok(());
        }
        if self.distinct {
            let key = format!("{value:?}");
            if !self.seen.insert(key) {
                return Ok(());
            }
        }

        match &mut self.state {
            State::Count(n) => *n += 1,
            State::Sum(acc) => match acc.add(value) {
                Some(next) => *acc = next,
                None => self.failed = true,
            },
            State::Avg(acc, n) => match acc.add(value) {
                Some(next) => {
                    *acc = next;
                    *n += 1;
                }
                None => self.failed = true,
            },
            State::Min(best) => {
                let replace = match best {
                    None => true,
                    Some(cur) => order_key(value) < order_key(cur),
                };
                if replace {
                    *best = Some(value.clone());
                }
            }
            State::Max(best) => {
                let replace = match best {
                    None => true,
                    Some(cur) => order_key(value) > order_key(cur),
                };
                if replace {
                    *best = Some(value.clone());
                }
            }
            State::Sample(slot) => {
                if slot.is_none() {
                    *slot = Some(value.clone());
                }
            }
            State::GroupConcat(parts) => parts.push(string_of(value)),
        }
        Ok(())
    }

    /// None when the aggregate saw incompatible values (e.g. SUM over a
    /// non-numeric); the caller surfaces that as an evaluation error.
    pub fn finish(self) -> Option<Value> {
        if self.failed {
            return None;
        }
        match self.state {
            State::Count(n) => Some(Value::Integer(n as i64)),
            State::Sum(acc) => Some(acc.value()),
            State::Avg(_, 0) => Some(Value::Integer(0)),
            State::Avg(acc, n) => Some(Value::Double(acc.as_f64() / n as f64)),
            // MIN/MAX/SAMPLE over an empty group surface as None
            State::Min(v) | State::Max(v) | State::Sample(v) => v,
            State::GroupConcat(parts) => {
                let sep = self.separator.as_deref().unwrap_or(" ");
                Some(Value::simple(parts.join(sep)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_stays_integer() {
        let mut acc = Accumulator::new(AggregateFunction::Sum, false, None);
        for i in 1..=5 {
            acc.update(&Value::Integer(i)).unwrap();
        }
        assert_eq!(acc.finish(), Some(Value::Integer(15)));
    }

    #[test]
    fn test_sum_promotes_to_double() {
        let mut acc = Accumulator::new(AggregateFunction::Sum, false, None);
        acc.update(&Value::Integer(1)).unwrap();
        acc.update(&Value::Double(0.5)).unwrap();
        assert_eq!(acc.finish(), Some(Value::Double(1.5)));
    }

    #[test]
    fn test_sum_over_non_numeric_fails() {
        let mut acc = Accumulator::new(AggregateFunction::Sum, false, None);
        acc.update(&Value::simple("abc")).unwrap();
        assert_eq!(acc.finish(), None);
    }

    #[test]
    fn test_count_distinct() {
        let mut acc = Accumulator::new(AggregateFunction::Count, true, None);
        acc.update(&Value::Integer(1)).unwrap();
        acc.update(&Value::Integer(1)).unwrap();
        acc.update(&Value::Integer(2)).unwrap();
        assert_eq!(acc.finish(), Some(Value::Integer(2)));
    }

    #[test]
    fn test_avg() {
        let mut acc = Accumulator::new(AggregateFunction::Avg, false, None);
        for i in [2, 4, 6] {
            acc.update(&Value::Integer(i)).unwrap();
        }
        assert_eq!(acc.finish(), Some(Value::Double(4.0)));
    }

    #[test]
    fn test_min_max_numeric_before_lexical() {
        let mut min = Accumulator::new(AggregateFunction::Min, false, None);
        let mut max = Accumulator::new(AggregateFunction::Max, false, None);
        for i in [10, 2, 33] {
            min.update(&Value::Integer(i)).unwrap();
            max.update(&Value::Integer(i)).unwrap();
        }
        assert_eq!(min.finish(), Some(Value::Integer(2)));
        assert_eq!(max.finish(), Some(Value::Integer(33)));
    }

    #[test]
    fn test_group_concat_separator() {
        let mut acc =
            Accumulator::new(AggregateFunction::GroupConcat, false, Some(", ".to_string()));
        acc.update(&Value::simple("a")).unwrap();
        acc.update(&Value::simple("b")).unwrap();
        assert_eq!(acc.finish(), Some(Value::simple("a, b")));
    }

    #[test]
    fn test_empty_group_counts_zero() {
        let acc = Accumulator::new(AggregateFunction::Count, false, None);
        assert_eq!(acc.finish(), Some(Value::Integer(0)));
        let acc = Accumulator::new(AggregateFunction::Sum, false, None);
        assert_eq!(acc.finish(), Some(Value::Integer(0)));
    }
}
