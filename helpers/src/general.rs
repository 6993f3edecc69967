use std::cmp::Ordering;
use std::error::Error;
use std::fmt;

/// InputValueError is used if some simulation option or parameter does not fulfill the posed
/// requirements, e.g., a race with the wrong number of racers.
#[derive(Debug, Clone)]
pub struct InputValueError {
    pub msg: String,
}

impl InputValueError {
    pub fn new(msg: impl Into<String>) -> InputValueError {
        InputValueError { msg: msg.into() }
    }
}

impl fmt::Display for InputValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid input value: {}", self.msg)
    }
}

impl Error for InputValueError {}

#[derive(Debug, Clone, Copy)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// argsort returns the indices that would sort an array. The sort is stable, i.e. indices of
/// equal (or incomparable) values keep their original relative order.
pub fn argsort<T: PartialOrd>(x: &[T], order: SortOrder) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..x.len()).collect();
    let cmp = |a: &T, b: &T| a.partial_cmp(b).unwrap_or(Ordering::Equal);
    match order {
        SortOrder::Ascending => indices.sort_by(|&a, &b| cmp(&x[a], &x[b])),
        SortOrder::Descending => indices.sort_by(|&a, &b| cmp(&x[b], &x[a])),
    }
    indices
}
