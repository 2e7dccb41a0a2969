//! Range and iterator values.

use std::cell::RefCell;

use crate::value::numeric::compare_numeric;
use crate::value::Value;
use std::cmp::Ordering;

/// `{start, end, exclusive}` plus an optional step (source grammar allows
/// `start..end step s`); step defaults to `Int32(1)`.
#[derive(Debug, Clone)]
pub struct RangeValue {
    pub start: Value,
    pub end: Value,
    pub exclusive: bool,
    pub step: Value,
}

impl RangeValue {
    pub fn new(start: Value, end: Value, exclusive: bool) -> Self {
        Self {
            start,
            end,
            exclusive,
            step: Value::Int32(1),
        }
    }

    pub fn with_step(start: Value, end: Value, exclusive: bool, step: Value) -> Self {
        Self {
            start,
            end,
            exclusive,
            step,
        }
    }

    /// `start..end` empty iff `start > end` (non-reverse) or `start == end`
    /// exclusive.
    pub fn is_empty(&self) -> bool {
        match compare_numeric(&self.start, &self.end) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => self.exclusive,
            _ => false,
        }
    }

    /// Number of Values this range would yield when both ends are
    /// integral; `None` if either end is non-numeric or the range is a
    /// float range (length is not meaningfully discrete there).
    pub fn len(&self) -> Option<i64> {
        if self.is_empty() {
            return Some(0);
        }
        let start = as_i64(&self.start)?;
        let end = as_i64(&self.end)?;
        let step = as_i64(&self.step).unwrap_or(1);
        if step == 0 {
            return None;
        }
        let end = if self.exclusive { end - step.signum() } else { end };
        if step > 0 {
            Some(((end - start) / step) + 1)
        } else {
            Some(((start - end) / -step) + 1)
        }
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int32(i) => Some(*i as i64),
        _ => None,
    }
}

/// Which collection an `Iterator` value walks, and its cursor state.
#[derive(Debug)]
pub enum IteratorKind {
    Array { data: Value, index: usize },
    Range { current: Value, range: RangeValue },
}

#[derive(Debug)]
pub struct IteratorValue {
    pub kind: RefCell<IteratorKind>,
}

impl IteratorValue {
    pub fn over_array(data: Value) -> Self {
        Self {
            kind: RefCell::new(IteratorKind::Array { data, index: 0 }),
        }
    }

    pub fn over_range(range: RangeValue) -> Self {
        let current = range.start.clone();
        Self {
            kind: RefCell::new(IteratorKind::Range { current, range }),
        }
    }

    /// Non-destructively report whether `next()` would yield another value.
    pub fn has_next(&self) -> bool {
        let kind = self.kind.borrow();
        match &*kind {
            IteratorKind::Array { data, index } => match data {
                Value::Array(arr) => *index < arr.borrow().len(),
                _ => false,
            },
            IteratorKind::Range { current, range } => {
                let (Value::Int32(cur), Value::Int32(end), Value::Int32(step)) =
                    (current, &range.end, &range.step)
                else {
                    return false;
                };
                if range.exclusive {
                    !((*step > 0 && *cur >= *end) || (*step < 0 && *cur <= *end))
                } else {
                    !((*step > 0 && *cur > *end) || (*step < 0 && *cur < *end))
                }
            }
        }
    }

    /// Advance and return the next Value, or `None` when exhausted.
    pub fn next(&self) -> Option<Value> {
        let mut kind = self.kind.borrow_mut();
        match &mut *kind {
            IteratorKind::Array { data, index } => {
                let Value::Array(arr) = data else {
                    return None;
                };
                let arr = arr.borrow();
                if *index >= arr.len() {
                    None
                } else {
                    let v = arr[*index].clone();
                    *index += 1;
                    Some(v)
                }
            }
            IteratorKind::Range { current, range } => {
                let Value::Int32(cur) = current else {
                    return None;
                };
                let Value::Int32(end) = range.end else {
                    return None;
                };
                let Value::Int32(step) = range.step else {
                    return None;
                };
                let done = if range.exclusive {
                    (step > 0 && *cur >= end) || (step < 0 && *cur <= end)
                } else {
                    (step > 0 && *cur > end) || (step < 0 && *cur < end)
                };
                if done {
                    None
                } else {
                    let result = Value::Int32(*cur);
                    *current = Value::Int32(*cur + step);
                    Some(result)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_when_start_greater_than_end() {
        let r = RangeValue::new(Value::Int32(5), Value::Int32(1), false);
        assert!(r.is_empty());
        assert_eq!(r.len(), Some(0));
    }

    #[test]
    fn empty_when_exclusive_and_equal() {
        let r = RangeValue::new(Value::Int32(3), Value::Int32(3), true);
        assert!(r.is_empty());
    }

    #[test]
    fn inclusive_equal_has_length_one() {
        let r = RangeValue::new(Value::Int32(3), Value::Int32(3), false);
        assert!(!r.is_empty());
        assert_eq!(r.len(), Some(1));
    }

    #[test]
    fn iterator_over_range_yields_expected_values() {
        let r = RangeValue::new(Value::Int32(1), Value::Int32(4), false);
        let it = IteratorValue::over_range(r);
        let mut out = Vec::new();
        while let Some(v) = it.next() {
            out.push(v);
        }
        assert_eq!(
            out,
            vec![
                Value::Int32(1),
                Value::Int32(2),
                Value::Int32(3),
                Value::Int32(4)
            ]
        );
    }

    #[test]
    fn has_next_does_not_consume() {
        let r = RangeValue::new(Value::Int32(1), Value::Int32(1), false);
        let it = IteratorValue::over_range(r);
        assert!(it.has_next());
        assert!(it.has_next());
        assert_eq!(it.next(), Some(Value::Int32(1)));
        assert!(!it.has_next());
        assert_eq!(it.next(), None);
    }

    #[test]
    fn iterator_over_array() {
        let arr = Value::new_array(vec![Value::Int32(10), Value::Int32(20)]);
        let it = IteratorValue::over_array(arr);
        assert_eq!(it.next(), Some(Value::Int32(10)));
        assert_eq!(it.next(), Some(Value::Int32(20)));
        assert_eq!(it.next(), None);
    }
}
