//! End-to-end scenarios driven through the public pool API: the front-end
//! rendezvous, split distribution, cooperative stops and shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use test_case::test_case;

use chess_core::movepick::MovePicker;
use chess_core::position::Position;
use chess_core::search::{
    Limits, PoolConfig, SearchDriver, SplitPoint, SplitRequest, Stack, StateHistory, StateInfo,
    ThreadPool, Worker,
};
use chess_core::types::{Move, NodeType, Value};

const NODES_PER_SEARCH: u64 = 7;

/// What the driver should do when the main worker picks up a think
/// request.
enum ThinkMode {
    /// Record what `start_thinking` published, then return.
    Inspect,
    /// Run one split over `moves` at `depth`, recording the outcome.
    Split {
        moves: Vec<Move>,
        depth: i32,
        cutoff_after_first: bool,
    },
    /// Park on the worker's condition variable until the stop signal.
    WaitForStop,
    /// A few top-level splits with randomized nested splits below them.
    Stress,
}

struct TestDriver {
    mode: ThinkMode,
    think_calls: AtomicUsize,
    search_calls: AtomicUsize,
    check_time_calls: AtomicUsize,
    pulled: AtomicUsize,
    root_moves_seen: AtomicUsize,
    root_key_seen: AtomicU64,
    states_present: AtomicBool,
    /// (value, best move, node-count delta) of the Split mode's split.
    result: Mutex<Option<(Value, Move, u64)>>,
    /// Parameters observed at the split point by the first participant.
    observed: Mutex<Option<(i32, i32, NodeType, Move, i32)>>,
}

impl TestDriver {
    fn new(mode: ThinkMode) -> Arc<TestDriver> {
        Arc::new(TestDriver {
            mode,
            think_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            check_time_calls: AtomicUsize::new(0),
            pulled: AtomicUsize::new(0),
            root_moves_seen: AtomicUsize::new(0),
            root_key_seen: AtomicU64::new(0),
            states_present: AtomicBool::new(false),
            result: Mutex::new(None),
            observed: Mutex::new(None),
        })
    }

    fn run_split(
        &self,
        pool: &Arc<ThreadPool>,
        worker: &Arc<Worker>,
        moves: &[Move],
        depth: i32,
    ) {
        let mut pos = pool.search_state().lock().unwrap().root_pos.clone();
        pos.set_this_thread(worker.index());
        let before = pos.nodes_searched();

        let picker = Arc::new(MovePicker::new(moves.to_vec()));
        let ss = Stack {
            ply: 3,
            ..Stack::default()
        };
        let mut best_move = Move::NONE;
        let value = pool.split::<false>(
            &mut pos,
            SplitRequest {
                ss: &ss,
                alpha: -50,
                beta: 50,
                best_value: -50,
                best_move: &mut best_move,
                depth,
                threat_move: Move::new(77),
                move_count: 1,
                move_picker: &picker,
                node_type: NodeType::Pv,
            },
        );

        *self.result.lock().unwrap() = Some((value, best_move, pos.nodes_searched() - before));
    }
}

impl SearchDriver for TestDriver {
    fn think(&self, pool: &Arc<ThreadPool>, worker: &Arc<Worker>) {
        self.think_calls.fetch_add(1, Ordering::SeqCst);

        match &self.mode {
            ThinkMode::Inspect => {
                let state = pool.search_state().lock().unwrap();
                self.root_moves_seen
                    .store(state.root_moves.len(), Ordering::SeqCst);
                self.root_key_seen
                    .store(state.root_pos.key(), Ordering::SeqCst);
                self.states_present
                    .store(state.states.is_some(), Ordering::SeqCst);
            }
            ThinkMode::Split { moves, depth, .. } => {
                self.run_split(pool, worker, moves, *depth);
            }
            ThinkMode::WaitForStop => {
                let timed = pool.search_state().lock().unwrap().limits.use_time_management();
                pool.timer().set_interval(if timed { 1 } else { 0 });
                worker.wait_until(|| pool.signals.stop.load(Ordering::Relaxed));
                pool.timer().set_interval(0);
            }
            ThinkMode::Stress => {
                let mut rng = rand::thread_rng();
                for _ in 0..4 {
                    let count = rng.gen_range(5..20);
                    let moves: Vec<Move> = (1..=count).map(Move::new).collect();
                    self.run_split(pool, worker, &moves, 3);
                }
            }
        }
    }

    fn search_at(
        &self,
        pool: &Arc<ThreadPool>,
        worker: &Arc<Worker>,
        sp: &Arc<SplitPoint>,
    ) -> u64 {
        self.search_calls.fetch_add(1, Ordering::SeqCst);

        sp.lock();
        let state = sp.state();
        let picker = state.move_picker.clone().unwrap();
        let depth = state.depth;
        let mut pos = state.pos.clone().unwrap();
        worker.update_max_ply(state.ss.ply);
        self.observed.lock().unwrap().get_or_insert((
            state.depth,
            state.move_count,
            state.node_type,
            state.threat_move,
            state.ss.ply,
        ));
        sp.unlock();

        let cutoff_after_first = matches!(
            self.mode,
            ThinkMode::Split {
                cutoff_after_first: true,
                ..
            }
        );

        while !worker.cutoff_occurred() {
            sp.lock();
            let Some((mv, ordinal)) = picker.next() else {
                sp.unlock();
                break;
            };
            self.pulled.fetch_add(1, Ordering::SeqCst);
            let state = sp.state_mut();
            let value = mv.raw() as Value;
            if value > state.best_value {
                state.best_value = value;
                state.best_move = mv;
            }
            if cutoff_after_first && ordinal == 1 {
                sp.set_cutoff(true);
            }
            sp.unlock();
        }

        // In stress mode slaves keep splitting below themselves while
        // depth and idle workers allow it.
        if matches!(self.mode, ThinkMode::Stress)
            && depth >= pool.min_split_depth()
            && pool.slave_available(worker)
        {
            let mut rng = rand::thread_rng();
            pos.set_this_thread(worker.index());
            let count = rng.gen_range(1..8);
            let picker = Arc::new(MovePicker::new((1..=count).map(Move::new).collect()));
            let ss = Stack::default();
            let mut best_move = Move::NONE;
            let _ = pool.split::<false>(
                &mut pos,
                SplitRequest {
                    ss: &ss,
                    alpha: -50,
                    beta: 50,
                    best_value: -50,
                    best_move: &mut best_move,
                    depth: depth - 1,
                    threat_move: Move::NONE,
                    move_count: 1,
                    move_picker: &picker,
                    node_type: NodeType::NonPv,
                },
            );
        }

        NODES_PER_SEARCH
    }

    fn check_time(&self, _pool: &Arc<ThreadPool>) {
        self.check_time_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn make_pool(workers: usize, driver: Arc<TestDriver>) -> Arc<ThreadPool> {
    let pool = ThreadPool::new(driver);
    pool.init(&PoolConfig {
        workers,
        max_slaves_per_split: 5,
        min_split_depth: 4,
    });
    pool
}

fn position_with_moves(key: u64, count: u16) -> Position {
    Position::new(key, (1..=count).map(Move::new).collect())
}

#[test_case(1; "single worker")]
#[test_case(4; "four workers")]
#[test_case(8; "eight workers")]
fn shutdown_joins_parked_workers(workers: usize) {
    let driver = TestDriver::new(ThinkMode::Inspect);
    let pool = make_pool(workers, driver.clone());
    assert_eq!(pool.size(), workers);

    pool.exit();

    assert_eq!(pool.size(), 0);
    // Nobody ever entered the search collaborator.
    assert_eq!(driver.think_calls.load(Ordering::SeqCst), 0);
    assert_eq!(driver.search_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn init_exit_cycles_are_clean() {
    for _ in 0..2 {
        let pool = make_pool(4, TestDriver::new(ThinkMode::Inspect));
        assert_eq!(pool.size(), 4);
        pool.exit();
        // exit is idempotent.
        pool.exit();
        assert_eq!(pool.size(), 0);
    }
}

#[test]
fn apply_config_grows_and_shrinks_the_fleet() {
    let driver = TestDriver::new(ThinkMode::Inspect);
    let pool = make_pool(2, driver.clone());

    pool.apply_config(&PoolConfig {
        workers: 8,
        max_slaves_per_split: 5,
        min_split_depth: 4,
    });
    assert_eq!(pool.size(), 8);
    for index in 0..8 {
        assert!(!pool.worker(index).unwrap().searching());
    }

    pool.apply_config(&PoolConfig {
        workers: 2,
        max_slaves_per_split: 5,
        min_split_depth: 4,
    });
    assert_eq!(pool.size(), 2);

    // The resized pool still serves searches.
    let pos = position_with_moves(1, 3);
    pool.start_thinking(&pos, &Limits::default(), &[], StateHistory::default());
    pool.wait_for_think_finished();
    assert_eq!(driver.think_calls.load(Ordering::SeqCst), 1);

    pool.exit();
}

#[test]
fn start_thinking_publishes_and_filters_root_moves() {
    let driver = TestDriver::new(ThinkMode::Inspect);
    let pool = make_pool(2, driver.clone());
    let pos = position_with_moves(0xfeed, 5);

    let allowed = [Move::new(2), Move::new(4)];
    let states = StateHistory(vec![StateInfo { key: 9, rule50: 0 }]);
    pool.start_thinking(&pos, &Limits::default(), &allowed, states);
    pool.wait_for_think_finished();

    assert_eq!(driver.root_moves_seen.load(Ordering::SeqCst), 2);
    assert_eq!(driver.root_key_seen.load(Ordering::SeqCst), 0xfeed);
    assert!(driver.states_present.load(Ordering::SeqCst));

    // An empty restriction admits the whole move list.
    pool.start_thinking(&pos, &Limits::default(), &[], StateHistory::default());
    pool.wait_for_think_finished();
    assert_eq!(driver.root_moves_seen.load(Ordering::SeqCst), 5);

    pool.exit();
}

#[test]
fn split_distributes_moves_and_conserves_node_counts() {
    let driver = TestDriver::new(ThinkMode::Split {
        moves: (1..=12).map(Move::new).collect(),
        depth: 8,
        cutoff_after_first: false,
    });
    let pool = make_pool(4, driver.clone());

    let pos = position_with_moves(1, 12);
    pool.start_thinking(&pos, &Limits::default(), &[], StateHistory::default());
    pool.wait_for_think_finished();

    let result = *driver.result.lock().unwrap();
    let (value, best_move, node_delta) = result.expect("split ran");
    assert_eq!(value, 12);
    assert!(!best_move.is_none());
    assert_eq!(best_move, Move::new(12));

    // Every participant contributed a fixed node count, and all of them
    // were folded back into the master's position.
    let participants = driver.search_calls.load(Ordering::SeqCst) as u64;
    assert!(participants >= 1);
    assert_eq!(node_delta, participants * NODES_PER_SEARCH);

    // The split point carried the master's search parameters verbatim.
    let observed = *driver.observed.lock().unwrap();
    assert_eq!(observed.expect("sp observed"), (8, 1, NodeType::Pv, Move::new(77), 3));
    assert_eq!(pool.main().max_ply(), 3);

    pool.exit();
}

#[test]
fn cutoff_abandons_the_remaining_moves() {
    let driver = TestDriver::new(ThinkMode::Split {
        moves: vec![Move::new(7); 500],
        depth: 8,
        cutoff_after_first: true,
    });
    let pool = make_pool(4, driver.clone());

    let pos = position_with_moves(1, 4);
    pool.start_thinking(&pos, &Limits::default(), &[], StateHistory::default());
    pool.wait_for_think_finished();

    let result = *driver.result.lock().unwrap();
    let (value, best_move, _) = result.expect("split ran");
    assert_eq!(value, 7);
    assert_eq!(best_move, Move::new(7));

    // Each participant notices the cutoff after at most one extra pull.
    assert!(driver.pulled.load(Ordering::SeqCst) < 100);

    pool.exit();
}

#[test]
fn stop_signal_releases_a_waiting_search() {
    let driver = TestDriver::new(ThinkMode::WaitForStop);
    let pool = make_pool(2, driver.clone());

    let pos = position_with_moves(1, 4);
    pool.start_thinking(&pos, &Limits::default(), &[], StateHistory::default());

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(driver.think_calls.load(Ordering::SeqCst), 1);
    // The timer polled the time check while the search was parked.
    assert!(driver.check_time_calls.load(Ordering::SeqCst) >= 1);

    pool.signals.stop.store(true, Ordering::Relaxed);
    pool.main().notify();
    pool.wait_for_think_finished();

    pool.exit();
}

#[test]
fn randomized_nested_splits_leave_the_pool_quiet() {
    let driver = TestDriver::new(ThinkMode::Stress);
    let pool = make_pool(4, driver.clone());
    // A low split-depth floor so depth-3 splits keep recursing.
    pool.apply_config(&PoolConfig {
        workers: 4,
        max_slaves_per_split: 5,
        min_split_depth: 2,
    });

    for round in 0..10 {
        // Exercise the busy-wait idle mode on a few rounds.
        pool.set_sleep_while_idle(!(4..6).contains(&round));

        let pos = position_with_moves(round as u64, 8);
        pool.start_thinking(&pos, &Limits::default(), &[], StateHistory::default());
        pool.wait_for_think_finished();

        for index in 0..pool.size() {
            let worker = pool.worker(index).unwrap();
            assert_eq!(worker.split_stack_size(), 0);
            assert!(!worker.searching());
        }
    }
    pool.set_sleep_while_idle(true);

    assert_eq!(driver.think_calls.load(Ordering::SeqCst), 10);
    assert!(driver.search_calls.load(Ordering::SeqCst) >= 10);

    pool.exit();
}
