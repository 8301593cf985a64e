//! Asynchronous row sources.

use rowgraph_core::{Cx, Error, Outcome, Result, Row};
use std::future::Future;

/// A pull-based, cancel-aware stream of rows.
///
/// The graph pipeline suspends only at `next_row` boundaries. Implementations
/// backed by a database cursor should check `cx` and return
/// `Outcome::Cancelled` promptly.
pub trait RowSource: Send {
    /// Fetch the next row; `None` when the source is exhausted.
    fn next_row(&mut self, cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;
}

/// In-memory row source.
///
/// Holds results rather than rows so transport failures can be replayed.
#[derive(Debug)]
pub struct VecRowSource {
    rows: std::vec::IntoIter<Result<Row>>,
    fetched: usize,
}

impl VecRowSource {
    /// A source yielding `rows` in order.
    pub fn new(rows: Vec<Row>) -> Self {
        Self::from_results(rows.into_iter().map(Ok).collect())
    }

    /// A source yielding each entry in order; an `Err` entry surfaces as
    /// `Outcome::Err` from `next_row`.
    pub fn from_results(rows: Vec<Result<Row>>) -> Self {
        Self {
            rows: rows.into_iter(),
            fetched: 0,
        }
    }

    /// Number of entries handed out so far.
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    /// Entries not yet handed out.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowSource for VecRowSource {
    fn next_row(&mut self, cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let outcome = if let Some(reason) = cx.cancel_reason() {
            Outcome::Cancelled(reason)
        } else {
            match self.rows.next() {
                Some(Ok(row)) => {
                    self.fetched += 1;
                    Outcome::Ok(Some(row))
                }
                Some(Err(e)) => {
                    self.fetched += 1;
                    Outcome::Err(e)
                }
                None => Outcome::Ok(None),
            }
        };
        std::future::ready(outcome)
    }
}
