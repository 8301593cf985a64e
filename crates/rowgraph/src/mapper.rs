//! Entry points: rows in, entity graphs out.

use crate::assemble::{AssemblyStrategy, Materialized};
use crate::config::{GraphConfig, RowOrdering};
use crate::graph::RelationGraph;
use crate::group::{GroupedState, Grouper};
use crate::source::RowSource;
use rowgraph_core::{CardinalityError, Cx, Error, Outcome, Result, Row, SchemaRegistry};
use std::marker::PhantomData;
use std::sync::Arc;

fn no_root() -> Error {
    Error::Cardinality(CardinalityError {
        expected: "exactly one",
        found: 0,
    })
}

impl RelationGraph {
    /// Fail fast when the root schema does not materialize `T`.
    fn check_root<T: 'static>(&self) -> Result<()> {
        let schema = self.root_schema();
        if schema.is::<T>() {
            return Ok(());
        }
        Err(Error::field_mismatch(
            schema.name(),
            "(root)",
            std::any::type_name::<T>(),
            schema.rust_type(),
        ))
    }

    /// Whether `single` may stop reading once the first root's run ends.
    ///
    /// Requires clustered input, and one-to-etc assembly: many-to-many bottoms
    /// merge data from every root.
    fn stops_early(&self) -> bool {
        self.ordering() == RowOrdering::ClusteredByRoot
            && *self.strategy() == AssemblyStrategy::OneToEtc
    }

    fn fold_rows<I>(&self, rows: I, first_only: bool) -> Result<GroupedState>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        let early = first_only && self.stops_early();
        let mut grouper = Grouper::new(self);
        for row in rows {
            let row = row?;
            if let Some(index) = grouper.push(&row)? {
                if early && index > 0 {
                    tracing::debug!("Next root reached on clustered input; stopped reading");
                    break;
                }
            }
        }
        Ok(grouper.finish())
    }

    async fn fold_source<S: RowSource>(
        &self,
        cx: &Cx,
        source: &mut S,
        first_only: bool,
    ) -> Outcome<GroupedState, Error> {
        let early = first_only && self.stops_early();
        let mut grouper = Grouper::new(self);
        loop {
            if let Some(reason) = cx.cancel_reason() {
                tracing::debug!("Row fetch cancelled; discarding grouped state");
                return Outcome::Cancelled(reason);
            }
            let row = match source.next_row(cx).await {
                Outcome::Ok(Some(row)) => row,
                Outcome::Ok(None) => break,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match grouper.push(&row) {
                Ok(Some(index)) if early && index > 0 => {
                    tracing::debug!("Next root reached on clustered input; stopped reading");
                    break;
                }
                Ok(_) => {}
                Err(e) => return Outcome::Err(e),
            }
        }
        Outcome::Ok(grouper.finish())
    }

    /// Run only the grouping stage over `rows`.
    pub fn group<I>(&self, rows: I) -> Result<GroupedState>
    where
        I: IntoIterator<Item = Row>,
    {
        self.fold_rows(rows.into_iter().map(Ok), false)
    }

    /// Rebuild every root found in `rows`.
    ///
    /// Rows are grouped eagerly; objects are built as the returned iterator
    /// is advanced, one root per item, in the order root keys were first seen.
    #[tracing::instrument(level = "debug", skip(self, rows), fields(root = self.root().entity()))]
    pub fn many<T, I>(&self, rows: I) -> Result<Materialized<'_, T>>
    where
        T: 'static,
        I: IntoIterator<Item = Row>,
    {
        self.try_many(rows.into_iter().map(Ok))
    }

    /// Rebuild the first root found in `rows`.
    ///
    /// Fails with a cardinality error when `rows` yields no root.
    #[tracing::instrument(level = "debug", skip(self, rows), fields(root = self.root().entity()))]
    pub fn single<T, I>(&self, rows: I) -> Result<T>
    where
        T: 'static,
        I: IntoIterator<Item = Row>,
    {
        self.try_single(rows.into_iter().map(Ok))
    }

    /// Like [`many`](Self::many), over fallible rows; the first row error is
    /// returned unchanged.
    pub fn try_many<T, I>(&self, rows: I) -> Result<Materialized<'_, T>>
    where
        T: 'static,
        I: IntoIterator<Item = Result<Row>>,
    {
        self.check_root::<T>()?;
        let state = self.fold_rows(rows, false)?;
        Ok(Materialized::new(self, state))
    }

    /// Like [`single`](Self::single), over fallible rows.
    pub fn try_single<T, I>(&self, rows: I) -> Result<T>
    where
        T: 'static,
        I: IntoIterator<Item = Result<Row>>,
    {
        self.check_root::<T>()?;
        let state = self.fold_rows(rows, true)?;
        Materialized::new(self, state)
            .next()
            .unwrap_or_else(|| Err(no_root()))
    }

    /// Drain `source` and rebuild every root.
    ///
    /// Cancellation is observed before each fetch; a cancelled call publishes
    /// nothing.
    #[tracing::instrument(level = "debug", skip(self, cx, source), fields(root = self.root().entity()))]
    pub async fn many_async<T, S>(
        &self,
        cx: &Cx,
        source: &mut S,
    ) -> Outcome<Materialized<'_, T>, Error>
    where
        T: 'static,
        S: RowSource,
    {
        if let Err(e) = self.check_root::<T>() {
            return Outcome::Err(e);
        }
        match self.fold_source(cx, source, false).await {
            Outcome::Ok(state) => Outcome::Ok(Materialized::new(self, state)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Read `source` and rebuild its first root.
    ///
    /// With [`RowOrdering::ClusteredByRoot`] reading stops at the first row of
    /// the second root; otherwise the source is drained.
    #[tracing::instrument(level = "debug", skip(self, cx, source), fields(root = self.root().entity()))]
    pub async fn single_async<T, S>(&self, cx: &Cx, source: &mut S) -> Outcome<T, Error>
    where
        T: 'static,
        S: RowSource,
    {
        if let Err(e) = self.check_root::<T>() {
            return Outcome::Err(e);
        }
        match self.fold_source(cx, source, true).await {
            Outcome::Ok(state) => match Materialized::<T>::new(self, state).next() {
                Some(Ok(root)) => Outcome::Ok(root),
                Some(Err(e)) => Outcome::Err(e),
                None => Outcome::Err(no_root()),
            },
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

/// A relation graph bound to its root type.
///
/// Cheap to clone; the graph itself is shared.
pub struct GraphMapper<T> {
    graph: Arc<RelationGraph>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> GraphMapper<T> {
    /// Build and validate a graph whose root materializes `T`.
    pub fn new(config: GraphConfig, registry: &SchemaRegistry) -> Result<Self> {
        Self::from_graph(Arc::new(RelationGraph::build(config, registry)?))
    }

    /// Bind an existing graph to `T`.
    pub fn from_graph(graph: Arc<RelationGraph>) -> Result<Self> {
        graph.check_root::<T>()?;
        Ok(Self {
            graph,
            _marker: PhantomData,
        })
    }

    /// The underlying graph.
    pub fn graph(&self) -> &Arc<RelationGraph> {
        &self.graph
    }

    /// See [`RelationGraph::many`].
    pub fn many<I>(&self, rows: I) -> Result<Materialized<'_, T>>
    where
        I: IntoIterator<Item = Row>,
    {
        self.graph.many(rows)
    }

    /// See [`RelationGraph::single`].
    pub fn single<I>(&self, rows: I) -> Result<T>
    where
        I: IntoIterator<Item = Row>,
    {
        self.graph.single(rows)
    }

    /// See [`RelationGraph::try_many`].
    pub fn try_many<I>(&self, rows: I) -> Result<Materialized<'_, T>>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        self.graph.try_many(rows)
    }

    /// See [`RelationGraph::try_single`].
    pub fn try_single<I>(&self, rows: I) -> Result<T>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        self.graph.try_single(rows)
    }

    /// See [`RelationGraph::many_async`].
    pub async fn many_async<S: RowSource>(
        &self,
        cx: &Cx,
        source: &mut S,
    ) -> Outcome<Materialized<'_, T>, Error> {
        self.graph.many_async(cx, source).await
    }

    /// See [`RelationGraph::single_async`].
    pub async fn single_async<S: RowSource>(&self, cx: &Cx, source: &mut S) -> Outcome<T, Error> {
        self.graph.single_async(cx, source).await
    }
}

impl<T> Clone for GraphMapper<T> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for GraphMapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphMapper")
            .field("root", &self.graph.root().entity())
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}
