use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use asupersync::runtime::RuntimeBuilder;
use asupersync::{CancelKind, CancelReason, Cx, Outcome};

use rowgraph::prelude::*;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[derive(Debug, Default, PartialEq)]
struct Order {
    id: i64,
    lines: Vec<Line>,
}

#[derive(Debug, Default, PartialEq)]
struct Line {
    id: i64,
    sku: String,
}

/// Row source that counts fetches through a shared counter.
struct CountingSource {
    rows: VecDeque<Row>,
    fetched: Arc<AtomicUsize>,
}

impl RowSource for CountingSource {
    fn next_row(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let row = self.rows.pop_front();
        if row.is_some() {
            self.fetched.fetch_add(1, Ordering::SeqCst);
        }
        async move { Outcome::Ok(row) }
    }
}

/// Row source whose cursor is torn down after `budget` rows.
struct DroppedCursor {
    rows: VecDeque<Row>,
    budget: usize,
}

impl RowSource for DroppedCursor {
    fn next_row(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let outcome = if self.budget == 0 {
            Outcome::Cancelled(CancelReason::user("cursor dropped"))
        } else {
            self.budget -= 1;
            Outcome::Ok(self.rows.pop_front())
        };
        async move { outcome }
    }
}

fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(
            EntitySchema::<Order>::new("Order")
                .field("id", SqlType::BigInt, |o: &mut Order, v: i64| o.id = v)
                .many("lines", "Line", |o: &mut Order, l: Line| o.lines.push(l))
                .build(),
        )
        .with(
            EntitySchema::<Line>::new("Line")
                .field("id", SqlType::BigInt, |l: &mut Line, v: i64| l.id = v)
                .field("sku", SqlType::Text, |l: &mut Line, v: String| l.sku = v)
                .build(),
        )
}

fn config(ordering: RowOrdering) -> GraphConfig {
    GraphConfig::new(EntityConfig::new("Order").column("orderId", "id").key("orderId"))
        .ordering(ordering)
        .branch(BranchConfig::new(
            "lines",
            EntityConfig::new("Line")
                .column("lineId", "id")
                .column("lineSku", "sku")
                .key("lineId"),
        ))
}

fn line(order: i64, line: i64) -> Row {
    Row::from_pairs([
        ("orderId", Value::BigInt(order)),
        ("lineId", Value::BigInt(line)),
        ("lineSku", Value::Text(format!("sku-{line}"))),
    ])
}

fn clustered_rows() -> Vec<Row> {
    vec![line(1, 1), line(1, 2), line(2, 3), line(2, 4), line(3, 5)]
}

#[test]
fn many_async_matches_sync_many() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let graph = RelationGraph::build(config(RowOrdering::Interleaved), &registry()).unwrap();

    rt.block_on(async {
        let mut source = VecRowSource::new(clustered_rows());
        let materialized = unwrap_outcome(graph.many_async::<Order, _>(&cx, &mut source).await);
        let orders: Vec<Order> = materialized.collect::<Result<_>>().unwrap();
        let expected: Vec<Order> = graph
            .many(clustered_rows())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(orders, expected);
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[1].lines[1].sku, "sku-4");
        assert_eq!(source.remaining(), 0);
    });
}

#[test]
fn single_async_drains_interleaved_sources() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let graph = RelationGraph::build(config(RowOrdering::Interleaved), &registry()).unwrap();

    rt.block_on(async {
        // Order 1 reappears after order 2; draining is the only safe choice.
        let rows = vec![line(1, 1), line(2, 3), line(1, 2)];
        let mut source = VecRowSource::new(rows);
        let order: Order = unwrap_outcome(graph.single_async(&cx, &mut source).await);
        assert_eq!(order.id, 1);
        assert_eq!(order.lines.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(source.fetched(), 3);
    });
}

#[test]
fn single_async_stops_after_first_run_when_clustered() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mapper =
        GraphMapper::<Order>::new(config(RowOrdering::ClusteredByRoot), &registry()).unwrap();

    rt.block_on(async {
        let fetched = Arc::new(AtomicUsize::new(0));
        let mut source = CountingSource {
            rows: clustered_rows().into(),
            fetched: Arc::clone(&fetched),
        };
        let order = unwrap_outcome(mapper.single_async(&cx, &mut source).await);
        assert_eq!(order.id, 1);
        assert_eq!(order.lines.len(), 2);
        // Two rows of order 1, plus the first row of order 2 that ends the run.
        assert_eq!(fetched.load(Ordering::SeqCst), 3);
        assert_eq!(source.rows.len(), 2);
    });
}

#[test]
fn sync_single_stops_early_when_clustered() {
    let graph = RelationGraph::build(config(RowOrdering::ClusteredByRoot), &registry()).unwrap();
    let pulled = AtomicUsize::new(0);
    let rows = clustered_rows().into_iter().inspect(|_| {
        pulled.fetch_add(1, Ordering::SeqCst);
    });
    let order: Order = graph.single(rows).unwrap();
    assert_eq!(order.lines.len(), 2);
    assert_eq!(pulled.load(Ordering::SeqCst), 3);
}

#[test]
fn single_async_on_empty_source_is_a_cardinality_error() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let graph = RelationGraph::build(config(RowOrdering::ClusteredByRoot), &registry()).unwrap();

    rt.block_on(async {
        let mut source = VecRowSource::new(Vec::new());
        match graph.single_async::<Order, _>(&cx, &mut source).await {
            Outcome::Err(e) => assert!(e.is_cardinality()),
            Outcome::Ok(order) => panic!("expected cardinality error, got {order:?}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    });
}

#[test]
fn source_errors_propagate_unchanged() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let graph = RelationGraph::build(config(RowOrdering::Interleaved), &registry()).unwrap();

    rt.block_on(async {
        let mut source = VecRowSource::from_results(vec![
            Ok(line(1, 1)),
            Err(Error::source_error("cursor closed")),
            Ok(line(1, 2)),
        ]);
        match graph.many_async::<Order, _>(&cx, &mut source).await {
            Outcome::Err(Error::Source(e)) => assert_eq!(e.message, "cursor closed"),
            Outcome::Err(other) => panic!("expected source error, got {other}"),
            Outcome::Ok(_) => panic!("expected source error"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
        // Nothing after the failure was read.
        assert_eq!(source.remaining(), 1);
    });
}

#[test]
fn cancelled_context_reads_nothing() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    cx.cancel_with(CancelKind::User, Some("request aborted"));
    let graph = RelationGraph::build(config(RowOrdering::Interleaved), &registry()).unwrap();

    rt.block_on(async {
        let mut source = VecRowSource::new(clustered_rows());
        match graph.many_async::<Order, _>(&cx, &mut source).await {
            Outcome::Cancelled(reason) => assert_eq!(reason.kind, CancelKind::User),
            Outcome::Ok(_) => panic!("expected cancellation"),
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
        assert_eq!(source.fetched(), 0);

        match graph.single_async::<Order, _>(&cx, &mut source).await {
            Outcome::Cancelled(reason) => assert_eq!(reason.kind, CancelKind::User),
            Outcome::Ok(order) => panic!("expected cancellation, got {order:?}"),
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
        assert_eq!(source.fetched(), 0);
        assert_eq!(source.remaining(), 5);
    });
}

#[test]
fn source_cancelled_mid_stream_publishes_nothing() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let graph = RelationGraph::build(config(RowOrdering::ClusteredByRoot), &registry()).unwrap();

    rt.block_on(async {
        let mut source = DroppedCursor {
            rows: clustered_rows().into(),
            budget: 2,
        };
        match graph.many_async::<Order, _>(&cx, &mut source).await {
            Outcome::Cancelled(reason) => assert_eq!(reason.kind, CancelKind::User),
            Outcome::Ok(_) => panic!("expected cancellation"),
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
        assert_eq!(source.rows.len(), 3);

        // The first order is still incomplete when the cursor goes away.
        let mut source = DroppedCursor {
            rows: clustered_rows().into(),
            budget: 1,
        };
        assert!(matches!(
            graph.single_async::<Order, _>(&cx, &mut source).await,
            Outcome::Cancelled(_)
        ));
    });
}
