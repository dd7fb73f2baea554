//! End-to-end scenarios for tidemark-network.
//!
//! Drive the public scheduler API with in-memory repositories and the
//! simulated executor, waiting for background propagation to settle.

use std::sync::Arc;
use std::time::Duration;

use tidemark_core::config::SchedulerConfig;
use tidemark_core::{DataId, Expression, Input, NodeState, Pointer, Symbol};
use tidemark_network::sim::{Outcome, SimulatedExecutor, StaticSymbolLibrary};
use tidemark_network::*;

const SETTLE: Duration = Duration::from_secs(5);

fn network_with(
    executor: Arc<SimulatedExecutor>,
    symbols: Arc<StaticSymbolLibrary>,
    queue: Arc<BroadcastQueue>,
) -> Arc<ExpressionNetwork> {
    let network = ExpressionNetwork::builder()
        .node_repository(Arc::new(InMemoryNodeRepository::new()))
        .task_repository(Arc::new(InMemoryTaskRepository::new()))
        .executor(executor.clone())
        .symbols(symbols)
        .message_queue(queue)
        .config(SchedulerConfig { workers: 4, lock_shards: 64, ..SchedulerConfig::default() })
        .build()
        .unwrap();
    executor.attach(&network);
    network
}

fn id(s: &str) -> DataId {
    DataId::from(s)
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_roots_one_operator() {
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(5)));
    let queue = Arc::new(BroadcastQueue::new(64));
    let network = network_with(executor.clone(), Arc::new(StaticSymbolLibrary::new()), queue.clone());
    let mut events = queue.subscribe([id("p1")]);

    network.add(Expression::make_root("d1")).await.unwrap();
    network.add(Expression::make_root("d2")).await.unwrap();
    let outputs = network
        .add(
            Expression::new(vec![Input::single("d1"), Input::single("d2")], "f1")
                .with_outputs(vec![id("p1")]),
        )
        .await
        .unwrap();
    assert_eq!(outputs, vec![id("p1")]);

    network.update_root(&id("d1"), Pointer(10)).await.unwrap();
    network.update_root(&id("d2"), Pointer(10)).await.unwrap();
    assert!(network.wait_settled(SETTLE).await);

    let p1 = network.node(&id("p1")).await.unwrap();
    assert_eq!(p1.effective_ptr, Pointer(10));
    assert!(p1.valid);
    assert_eq!(network.node_state(&id("p1")), Some(NodeState::Finished));
    assert_eq!(executor.calls_for(&id("p1")), 1);
    assert_eq!(events.recv().await.unwrap().status, NodeState::Running);
    assert_eq!(events.recv().await.unwrap().status, NodeState::Finished);

    assert_eq!(network.update_func(&"f1".into()).await.unwrap(), 1);
    let p1 = network.node(&id("p1")).await.unwrap();
    assert_eq!(p1.effective_ptr, Pointer::ZERO);
    assert!(p1.valid);

    let metrics = network.metrics();
    assert_eq!(metrics.runs_started, 1);
    assert_eq!(metrics.runs_finished, 1);
    assert_eq!(metrics.pool.backlog, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expected_is_min_of_upstreams_on_tick_boundary() {
    let symbols = Arc::new(StaticSymbolLibrary::new());
    symbols.insert(Symbol::new("p1", "time", 0, "5"));
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(1)));
    let network = network_with(executor, symbols, Arc::new(BroadcastQueue::new(8)));

    network.add(Expression::make_root("d1")).await.unwrap();
    network.add(Expression::make_root("d2")).await.unwrap();
    network
        .add(Expression::new(vec![Input::list(vec![id("d1"), id("d2")])], "sum").with_outputs(vec![id("p1")]))
        .await
        .unwrap();

    network.update_root(&id("d1"), Pointer(10)).await.unwrap();
    network.update_root(&id("d2"), Pointer(20)).await.unwrap();
    assert!(network.wait_settled(SETTLE).await);

    let p1 = network.node(&id("p1")).await.unwrap();
    assert_eq!(p1.expected_ptr, Pointer(10));
    assert_eq!(p1.effective_ptr, Pointer(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn diamond_converges_once_both_paths_finish() {
    // d1 -> l, d1 -> r, (l, r) -> j
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(3)));
    let network = network_with(executor.clone(), Arc::new(StaticSymbolLibrary::new()), Arc::new(BroadcastQueue::new(8)));

    network.add(Expression::make_root("d1")).await.unwrap();
    for (func, out) in [("left", "l"), ("right", "r")] {
        network
            .add(Expression::new(vec![Input::single("d1")], func).with_outputs(vec![id(out)]))
            .await
            .unwrap();
    }
    network
        .add(Expression::new(vec![Input::single("l"), Input::single("r")], "join").with_outputs(vec![id("j")]))
        .await
        .unwrap();

    for ptr in [5, 10, 15] {
        network.update_root(&id("d1"), Pointer(ptr)).await.unwrap();
    }
    assert!(network.wait_settled(SETTLE).await);

    for node in ["l", "r", "j"] {
        assert_eq!(network.node(&id(node)).await.unwrap().effective_ptr, Pointer(15), "{}", node);
    }
    assert_eq!(executor.overlaps(), 0);
    assert_eq!(network.node(&id("j")).await.unwrap().depth, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_operator_poisons_only_its_descendants() {
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(2)));
    let network = network_with(executor.clone(), Arc::new(StaticSymbolLibrary::new()), Arc::new(BroadcastQueue::new(8)));

    network.add(Expression::make_root("d1")).await.unwrap();
    network.add(Expression::new(vec![Input::single("d1")], "ok").with_outputs(vec![id("good")])).await.unwrap();
    network.add(Expression::new(vec![Input::single("d1")], "boom").with_outputs(vec![id("bad")])).await.unwrap();
    network.add(Expression::new(vec![Input::single("bad")], "after").with_outputs(vec![id("child")])).await.unwrap();
    executor.set_outcome("bad", Outcome::Fail("division by zero".to_string()));

    network.update_root(&id("d1"), Pointer(10)).await.unwrap();
    assert!(network.wait_settled(SETTLE).await);

    let good = network.node(&id("good")).await.unwrap();
    assert!(good.valid);
    assert_eq!(good.effective_ptr, Pointer(10));
    for node in ["bad", "child"] {
        let n = network.node(&id(node)).await.unwrap();
        assert!(!n.valid, "{}", node);
        assert_eq!(n.effective_ptr, Pointer::ZERO);
    }
    let task = network.latest_task(&id("bad"), None).await.unwrap().unwrap();
    assert_eq!(task.failed_reason.as_deref(), Some("division by zero"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_reference_creates_nothing() {
    let network = network_with(
        Arc::new(SimulatedExecutor::new(Duration::ZERO)),
        Arc::new(StaticSymbolLibrary::new()),
        Arc::new(BroadcastQueue::new(8)),
    );
    let err = network
        .add(Expression::new(vec![Input::single("ghost")], "f1").with_outputs(vec![id("p1")]))
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::UnknownReference(_)));
    assert!(matches!(network.node(&id("p1")).await, Err(NetworkError::NodeNotFound(_))));
    assert!(network.wait_settled(SETTLE).await);
}
