//! Worker pool and split points for parallel alpha-beta search.
//!
//! Work distribution follows the Young Brothers Wait discipline: a worker
//! searching a node may, once its first child is done, open a *split
//! point*, recruit idle workers as slaves for the remaining children, and
//! join them itself through its own idle loop ("helpful master"). The
//! master leaves the split only when every slave has booked out.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lock_api::RawMutex;
use log::{debug, trace};

use crate::constants::MAX_SPLITPOINTS_PER_THREAD;
use crate::movepick::MovePicker;
use crate::position::Position;
use crate::search::spinlock::RawSpinLock;
use crate::search::{
    Limits, PoolConfig, RootMove, SearchDriver, SearchState, Signals, Stack, StateHistory,
};
use crate::types::{Depth, Move, NodeType, VALUE_INFINITE, Value};
use crate::util::bitset::AtomicBitSet;

/// Search-node state shared by every participant of a split point.
///
/// Mutate only while holding the split point's lock; the lock-free pieces
/// (slave mask, cutoff flag, node counter) live on [`SplitPoint`] itself.
pub struct SplitPointState {
    /// Index of the worker that opened this split point.
    pub master: usize,
    /// Enclosing split point on the master's stack, if any.
    pub parent: Option<Arc<SplitPoint>>,
    pub depth: Depth,
    pub alpha: Value,
    pub beta: Value,
    pub best_value: Value,
    pub best_move: Move,
    pub threat_move: Move,
    pub move_count: i32,
    pub node_type: NodeType,
    /// Shared cursor over the node's remaining moves.
    pub move_picker: Option<Arc<MovePicker>>,
    /// Snapshot of the master's position at the node.
    pub pos: Option<Position>,
    /// Snapshot of the master's search-stack frame at the node.
    pub ss: Stack,
}

/// Descriptor of one parallel node.
///
/// Split points are owned by their master's split stack and recycled in
/// place on every push; slaves keep non-owning handles for exactly as long
/// as their bit stays in the slave mask.
pub struct SplitPoint {
    lock: RawSpinLock,
    /// Bit `i` set iff worker `i` currently participates here, master
    /// included. Shrinks to the master's bit as slaves finish, and to
    /// zero when the master pops the split point.
    slaves: AtomicBitSet,
    cutoff: AtomicBool,
    /// Nodes searched by all participants at this split point.
    nodes: AtomicU64,
    state: UnsafeCell<SplitPointState>,
}

unsafe impl Sync for SplitPoint {}

impl SplitPoint {
    fn new() -> SplitPoint {
        SplitPoint {
            lock: RawSpinLock::INIT,
            slaves: AtomicBitSet::new(),
            cutoff: AtomicBool::new(false),
            nodes: AtomicU64::new(0),
            state: UnsafeCell::new(SplitPointState {
                master: 0,
                parent: None,
                depth: 0,
                alpha: 0,
                beta: 0,
                best_value: 0,
                best_move: Move::NONE,
                threat_move: Move::NONE,
                move_count: 0,
                node_type: NodeType::NonPv,
                move_picker: None,
                pos: None,
                ss: Stack::default(),
            }),
        }
    }

    /// Acquires the split point's lock.
    #[inline]
    pub fn lock(&self) {
        self.lock.lock();
    }

    /// Releases the split point's lock.
    #[inline]
    pub fn unlock(&self) {
        unsafe { self.lock.unlock() };
    }

    /// Shared view of the split point state.
    #[inline]
    pub fn state(&self) -> &SplitPointState {
        unsafe { &*self.state.get() }
    }

    /// Mutable view of the split point state. Callers must hold the split
    /// point's lock, or be the master before the split becomes visible.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn state_mut(&self) -> &mut SplitPointState {
        unsafe { &mut *self.state.get() }
    }

    /// Raw snapshot of the participant mask.
    #[inline]
    pub fn slaves_mask(&self) -> u64 {
        self.slaves.load()
    }

    /// True once a beta cutoff at this node made the remaining moves
    /// irrelevant. Readable without the lock; set it while holding it.
    #[inline]
    pub fn cutoff(&self) -> bool {
        self.cutoff.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_cutoff(&self, cutoff: bool) {
        self.cutoff.store(cutoff, Ordering::Relaxed);
    }

    /// Nodes searched under this split point so far.
    #[inline]
    pub fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }
}

/// One search worker: an OS thread alternating between a parked idle loop
/// and search work, plus the stack of split points it has opened as master.
pub struct Worker {
    index: usize,
    pool: Weak<ThreadPool>,
    park_lock: Mutex<()>,
    park_cond: Condvar,
    searching: AtomicBool,
    exit: AtomicBool,
    /// Rendezvous flag with the front-end; meaningful only on the main
    /// worker (index 0).
    thinking: AtomicBool,
    /// Deepest ply reached in the current search. Diagnostic only.
    max_ply: AtomicI32,
    split_count: AtomicUsize,
    split_stack: [Arc<SplitPoint>; MAX_SPLITPOINTS_PER_THREAD],
    /// Split point this worker currently works at, as master or slave.
    /// Written only during recruitment (under the pool and split locks) or
    /// by the split master itself; read by the owning thread.
    active_split: UnsafeCell<Option<Arc<SplitPoint>>>,
}

unsafe impl Sync for Worker {}

impl Worker {
    fn new(index: usize, pool: Weak<ThreadPool>) -> Arc<Worker> {
        Arc::new(Worker {
            index,
            pool,
            park_lock: Mutex::new(()),
            park_cond: Condvar::new(),
            searching: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            thinking: AtomicBool::new(false),
            max_ply: AtomicI32::new(0),
            split_count: AtomicUsize::new(0),
            split_stack: std::array::from_fn(|_| Arc::new(SplitPoint::new())),
            active_split: UnsafeCell::new(None),
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn searching(&self) -> bool {
        self.searching.load(Ordering::Acquire)
    }

    /// Number of split points this worker currently has open as master.
    #[inline]
    pub fn split_stack_size(&self) -> usize {
        self.split_count.load(Ordering::Acquire)
    }

    /// Deepest ply reached in the current search.
    #[inline]
    pub fn max_ply(&self) -> i32 {
        self.max_ply.load(Ordering::Relaxed)
    }

    /// Records the deepest ply reached by this worker's search.
    #[inline]
    pub fn update_max_ply(&self, ply: i32) {
        self.max_ply.fetch_max(ply, Ordering::Relaxed);
    }

    /// Split point this worker is currently working at, if any.
    pub fn active_split(&self) -> Option<Arc<SplitPoint>> {
        unsafe { (*self.active_split.get()).clone() }
    }

    fn set_active_split(&self, sp: Option<Arc<SplitPoint>>) {
        unsafe { *self.active_split.get() = sp };
    }

    /// Wakes the worker if it is parked. Notifies every waiter because a
    /// `wait_until` caller may share the condition variable with the
    /// worker's own idle loop.
    pub fn notify(&self) {
        let _guard = self.park_lock.lock().unwrap();
        self.park_cond.notify_all();
    }

    /// Parks the calling thread on this worker's condition variable until
    /// `pred` holds, rechecking it under the lock after every wake. Meant
    /// to be called by the worker's own thread, which is then the only
    /// waiter `notify` can reach.
    pub fn wait_until<F: FnMut() -> bool>(&self, mut pred: F) {
        let guard = self.park_lock.lock().unwrap();
        let _guard = self.park_cond.wait_while(guard, |_| !pred()).unwrap();
    }

    /// True iff a beta cutoff happened at the worker's current split point
    /// or any of its ancestors.
    pub fn cutoff_occurred(&self) -> bool {
        let mut current = self.active_split();
        while let Some(sp) = current {
            if sp.cutoff() {
                return true;
            }
            current = sp.state().parent.clone();
        }
        false
    }

    /// Whether this worker can serve as a slave for `master`.
    ///
    /// An idle worker with no split points of its own helps anyone. A
    /// worker that is itself a master may only help workers searching
    /// below its most recent split point, so it can never block on work
    /// outside its own subtree.
    pub fn is_available_to(&self, master: &Worker) -> bool {
        if self.searching() {
            return false;
        }

        // Local copy: the count may drop while we test the second
        // condition, and reading it once keeps the stack index in bounds.
        let size = self.split_count.load(Ordering::Acquire);

        size == 0 || self.split_stack[size - 1].slaves.test(master.index)
    }

    /// Top-level loop of a freshly spawned worker.
    fn idle_loop(self: &Arc<Self>) {
        self.work_loop(None);
    }

    /// Shared loop body behind the idle loop.
    ///
    /// `this_sp` is `Some` only when re-entered from `ThreadPool::split`
    /// on the master of that split point; the loop then returns once the
    /// master's flag is clear and it is the last participant left in the
    /// mask. With `this_sp == None` the loop runs until shutdown.
    fn work_loop(self: &Arc<Self>, this_sp: Option<&Arc<SplitPoint>>) {
        debug_assert!(this_sp.is_none() || self.searching());

        loop {
            // Park until assigned work. A master arriving from split()
            // skips this on the first pass: its searching flag is still
            // set, so it launches the search at its own split point right
            // away.
            while !self.searching.load(Ordering::Acquire) {
                if self.exit.load(Ordering::Acquire) {
                    debug_assert!(this_sp.is_none());
                    return;
                }
                if let Some(sp) = this_sp
                    && sp.slaves.only(self.index)
                {
                    return;
                }
                if self.pool.upgrade().is_none_or(|p| p.sleep_while_idle()) {
                    let guard = self.park_lock.lock().unwrap();
                    let _guard = self
                        .park_cond
                        .wait_while(guard, |_| {
                            !self.searching.load(Ordering::Acquire)
                                && !self.exit.load(Ordering::Acquire)
                                && !this_sp.is_some_and(|sp| sp.slaves.only(self.index))
                        })
                        .unwrap();
                } else {
                    std::thread::yield_now();
                }
            }

            let Some(pool) = self.pool.upgrade() else {
                return;
            };
            let sp = self
                .active_split()
                .expect("worker flagged searching without a split point");

            let searched = pool.driver().search_at(&pool, self, &sp);

            // Book out of the split point. The flag and mask updates must
            // happen under its lock so they cannot race with recruitment
            // or with the master's completion check.
            sp.lock();
            self.searching.store(false, Ordering::Release);
            sp.nodes.fetch_add(searched, Ordering::Relaxed);
            let master_index = sp.state().master;
            if master_index != self.index {
                sp.slaves.reset(self.index);
                // Last slave out wakes the master, which can only be
                // parked once its own flag is clear.
                if sp.slaves.only(master_index)
                    && let Some(master) = pool.worker(master_index)
                    && !master.searching()
                {
                    master.notify();
                }
            }
            sp.unlock();
            // The split point must not be touched past this point: the
            // master is free to pop and recycle it.
        }
    }

    /// Rendezvous loop of the main worker: parks between searches and runs
    /// the root search whenever the front-end raises the thinking flag.
    fn main_loop(self: &Arc<Self>) {
        loop {
            {
                let guard = self.park_lock.lock().unwrap();
                // Signal only the thinking -> false edge; the
                // predicate-protected wait in wait_for_think_finished
                // absorbs everything else.
                if self.thinking.swap(false, Ordering::AcqRel)
                    && let Some(pool) = self.pool.upgrade()
                {
                    pool.cond.notify_all();
                }
                let _guard = self
                    .park_cond
                    .wait_while(guard, |_| {
                        !self.thinking.load(Ordering::Acquire)
                            && !self.exit.load(Ordering::Acquire)
                    })
                    .unwrap();
            }

            if self.exit.load(Ordering::Acquire) {
                return;
            }
            let Some(pool) = self.pool.upgrade() else {
                return;
            };

            self.searching.store(true, Ordering::Release);
            pool.driver().think(&pool, self);
            debug_assert!(self.searching());
            self.searching.store(false, Ordering::Release);
        }
    }
}

/// Dedicated thread that wakes every `msec` milliseconds to run the
/// search's time check. An interval of zero parks it indefinitely.
pub struct TimerWorker {
    park_lock: Mutex<()>,
    park_cond: Condvar,
    msec: AtomicU64,
    exit: AtomicBool,
}

impl TimerWorker {
    fn new() -> TimerWorker {
        TimerWorker {
            park_lock: Mutex::new(()),
            park_cond: Condvar::new(),
            msec: AtomicU64::new(0),
            exit: AtomicBool::new(false),
        }
    }

    /// Sets the polling interval and wakes the timer so the new interval
    /// takes effect at once.
    pub fn set_interval(&self, msec: u64) {
        self.msec.store(msec, Ordering::Relaxed);
        self.notify();
    }

    pub fn notify(&self) {
        let _guard = self.park_lock.lock().unwrap();
        self.park_cond.notify_one();
    }

    fn idle_loop(self: Arc<Self>, pool: Weak<ThreadPool>) {
        while !self.exit.load(Ordering::Acquire) {
            {
                let guard = self.park_lock.lock().unwrap();
                if !self.exit.load(Ordering::Acquire) {
                    let msec = self.msec.load(Ordering::Relaxed);
                    if msec > 0 {
                        let _ = self
                            .park_cond
                            .wait_timeout(guard, Duration::from_millis(msec))
                            .unwrap();
                    } else {
                        let _guard = self.park_cond.wait(guard).unwrap();
                    }
                }
            }

            if self.msec.load(Ordering::Relaxed) > 0
                && let Some(pool) = pool.upgrade()
            {
                pool.driver().check_time(&pool);
            }
        }
    }
}

/// Bundled arguments for [`ThreadPool::split`].
pub struct SplitRequest<'a> {
    /// The master's search-stack frame at the node.
    pub ss: &'a Stack,
    pub alpha: Value,
    pub beta: Value,
    pub best_value: Value,
    /// Best move so far; receives the split's best move on return.
    pub best_move: &'a mut Move,
    pub depth: Depth,
    pub threat_move: Move,
    pub move_count: i32,
    /// Cursor over the node's remaining moves, shared with the slaves.
    pub move_picker: &'a Arc<MovePicker>,
    pub node_type: NodeType,
}

struct PoolState {
    workers: Vec<Arc<Worker>>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the worker fleet and serves split requests.
///
/// Construct with [`ThreadPool::new`], then call [`init`](Self::init) once
/// the collaborators the driver depends on are ready; `exit` (or dropping
/// the pool) joins every thread.
pub struct ThreadPool {
    /// Pool-wide lock serializing slave allocation and fleet changes.
    /// Always taken before a split point's lock, never after.
    lock: RawSpinLock,
    /// Signalled on the thinking -> false edge; waited on with the main
    /// worker's park lock by `wait_for_think_finished`.
    cond: Condvar,
    /// Fleet storage. Mutated only by `init`, `apply_config` and `exit`,
    /// with no search in flight; read-side accessors go through `state()`.
    state: UnsafeCell<PoolState>,
    timer: Arc<TimerWorker>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    driver: Arc<dyn SearchDriver>,
    sleep_while_idle: AtomicBool,
    min_split_depth: AtomicI32,
    max_slaves_per_split: AtomicUsize,
    pub signals: Signals,
    search_state: Mutex<SearchState>,
}

unsafe impl Sync for ThreadPool {}

impl ThreadPool {
    /// Creates an empty pool around the given search driver. No threads
    /// are spawned until `init`.
    pub fn new(driver: Arc<dyn SearchDriver>) -> Arc<ThreadPool> {
        Arc::new(ThreadPool {
            lock: RawSpinLock::INIT,
            cond: Condvar::new(),
            state: UnsafeCell::new(PoolState {
                workers: Vec::new(),
                handles: Vec::new(),
            }),
            timer: Arc::new(TimerWorker::new()),
            timer_handle: Mutex::new(None),
            driver,
            sleep_while_idle: AtomicBool::new(true),
            min_split_depth: AtomicI32::new(0),
            max_slaves_per_split: AtomicUsize::new(0),
            signals: Signals::default(),
            search_state: Mutex::new(SearchState::new()),
        })
    }

    #[inline]
    fn state(&self) -> &PoolState {
        unsafe { &*self.state.get() }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn state_mut(&self) -> &mut PoolState {
        unsafe { &mut *self.state.get() }
    }

    /// Spawns the timer and the main worker, then sizes the fleet from the
    /// configuration. Separate from `new` so every subsystem the driver
    /// needs is up before the first worker thread exists.
    pub fn init(self: &Arc<Self>, cfg: &PoolConfig) {
        self.sleep_while_idle.store(true, Ordering::Relaxed);

        let timer = self.timer.clone();
        let pool = Arc::downgrade(self);
        let handle = std::thread::Builder::new()
            .name("search-timer".to_string())
            .spawn(move || timer.idle_loop(pool))
            .expect("failed to spawn timer thread");
        *self.timer_handle.lock().unwrap() = Some(handle);

        self.spawn_worker(0);
        self.apply_config(cfg);
    }

    /// Joins every thread the pool started. The timer goes first because
    /// the time check reads worker state. Idempotent.
    pub fn exit(&self) {
        self.timer.exit.store(true, Ordering::Release);
        self.timer.notify();
        if let Some(handle) = self.timer_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        let state = self.state_mut();
        for worker in &state.workers {
            worker.exit.store(true, Ordering::Release);
            worker.notify();
        }
        for handle in state.handles.drain(..) {
            let _ = handle.join();
        }
        if !state.workers.is_empty() {
            debug!("pool stopped, {} workers joined", state.workers.len());
        }
        state.workers.clear();
    }

    /// Reads the tuning parameters and grows or shrinks the fleet to the
    /// requested size, one worker at a time. New workers start parked.
    pub fn apply_config(self: &Arc<Self>, cfg: &PoolConfig) {
        assert!(cfg.workers >= 1, "pool needs at least the main worker");
        assert!(cfg.workers <= crate::constants::MAX_WORKERS);

        self.max_slaves_per_split
            .store(cfg.max_slaves_per_split, Ordering::Relaxed);
        self.min_split_depth
            .store(cfg.min_split_depth, Ordering::Relaxed);

        while self.state().workers.len() < cfg.workers {
            let index = self.state().workers.len();
            self.spawn_worker(index);
            debug!("worker {index} started");
        }

        while self.state().workers.len() > cfg.workers {
            let state = self.state_mut();
            let worker = state.workers.pop().unwrap();
            let handle = state.handles.pop().unwrap();
            worker.exit.store(true, Ordering::Release);
            worker.notify();
            let _ = handle.join();
            debug!("worker {} stopped", worker.index);
        }
    }

    fn spawn_worker(self: &Arc<Self>, index: usize) {
        let worker = Worker::new(index, Arc::downgrade(self));
        let runner = worker.clone();
        let handle = std::thread::Builder::new()
            .name(format!("search-{index}"))
            .spawn(move || {
                if runner.index == 0 {
                    runner.main_loop();
                } else {
                    runner.idle_loop();
                }
            })
            .unwrap_or_else(|err| panic!("failed to spawn search worker {index}: {err}"));

        let state = self.state_mut();
        state.workers.push(worker);
        state.handles.push(handle);
    }

    /// The main worker, always at index 0.
    pub fn main(&self) -> Arc<Worker> {
        self.state().workers[0].clone()
    }

    pub fn worker(&self, index: usize) -> Option<Arc<Worker>> {
        self.state().workers.get(index).cloned()
    }

    /// Current fleet size, main worker included.
    pub fn size(&self) -> usize {
        self.state().workers.len()
    }

    pub fn timer(&self) -> &TimerWorker {
        &self.timer
    }

    pub fn driver(&self) -> &Arc<dyn SearchDriver> {
        &self.driver
    }

    pub fn search_state(&self) -> &Mutex<SearchState> {
        &self.search_state
    }

    #[inline]
    pub fn min_split_depth(&self) -> Depth {
        self.min_split_depth.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_slaves_per_split(&self) -> usize {
        self.max_slaves_per_split.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sleep_while_idle(&self) -> bool {
        self.sleep_while_idle.load(Ordering::Relaxed)
    }

    /// When disabled, idle workers spin-yield instead of parking, trading
    /// CPU for wake latency.
    pub fn set_sleep_while_idle(&self, sleep: bool) {
        self.sleep_while_idle.store(sleep, Ordering::Relaxed);
    }

    /// True iff some worker could currently join `master` at a split
    /// point. A hint only: the answer may be stale by the time the caller
    /// acts on it, so `split` re-checks every candidate under the pool
    /// lock.
    pub fn slave_available(&self, master: &Worker) -> bool {
        self.state()
            .workers
            .iter()
            .any(|w| w.is_available_to(master))
    }

    /// Distributes the remaining moves of a node between available
    /// workers.
    ///
    /// Binds the next split point on the master's stack, recruits idle
    /// slaves under the pool lock, and sends the master through its base
    /// idle loop to work the node alongside them. Returns the split's best
    /// value once every participant is done, with the best move written
    /// through the request.
    ///
    /// With `FAKE` the recruitment scan is skipped; the master still runs
    /// the split-point machinery, which exercises the bookkeeping without
    /// parallelism.
    ///
    /// When the master's split stack is already full the node is searched
    /// sequentially instead: the call returns the unchanged `best_value`
    /// without taking any lock.
    pub fn split<const FAKE: bool>(
        self: &Arc<Self>,
        pos: &mut Position,
        req: SplitRequest<'_>,
    ) -> Value {
        assert!(req.best_value > -VALUE_INFINITE && req.best_value <= req.alpha);
        assert!(req.alpha < req.beta && req.beta <= VALUE_INFINITE);
        assert!(req.depth > 0);

        let master = self
            .worker(pos.this_thread())
            .expect("position not bound to a pool worker");
        assert!(master.searching());

        if master.split_stack_size() >= MAX_SPLITPOINTS_PER_THREAD {
            trace!("split declined, worker {} stack is full", master.index);
            return req.best_value;
        }

        // Bind the next slot on the master's split stack. No contention
        // here: the slot becomes visible to other workers only when the
        // stack size is bumped below, under the locks.
        let sp = master.split_stack[master.split_stack_size()].clone();
        {
            let state = sp.state_mut();
            state.master = master.index;
            state.parent = master.active_split();
            state.depth = req.depth;
            state.alpha = req.alpha;
            state.beta = req.beta;
            state.best_value = req.best_value;
            state.best_move = *req.best_move;
            state.threat_move = req.threat_move;
            state.move_count = req.move_count;
            state.node_type = req.node_type;
            state.move_picker = Some(req.move_picker.clone());
            state.pos = Some(pos.clone());
            state.ss = *req.ss;
        }
        sp.slaves.clear();
        sp.slaves.set(master.index);
        sp.set_cutoff(false);
        sp.nodes.store(0, Ordering::Relaxed);
        master.set_active_split(Some(sp.clone()));

        // Allocate idle workers and flag them searching. Both locks are
        // required so no other master can grab the same slave.
        let mut recruited = 0usize;
        self.lock.lock();
        sp.lock();

        if !FAKE {
            let cap = self.max_slaves_per_split();
            for worker in &self.state().workers {
                if recruited + 1 >= cap {
                    break;
                }
                if worker.is_available_to(&master) {
                    sp.slaves.set(worker.index);
                    worker.set_active_split(Some(sp.clone()));
                    worker.searching.store(true, Ordering::Release);
                    worker.notify();
                    recruited += 1;
                }
            }
        }

        master.split_count.fetch_add(1, Ordering::Release);

        sp.unlock();
        unsafe { self.lock.unlock() };

        // Everything is set up: the master joins its own split point
        // through the base idle loop. Its searching flag is still set, so
        // the loop launches the search at once and returns only when the
        // split has drained.
        if recruited > 0 || FAKE {
            master.work_loop(Some(&sp));

            // A helpful master only ever works below its own split point,
            // so with the split drained nobody can have booked it.
            debug_assert!(!master.searching());
        }

        // All participants are done. Reacquire both locks before touching
        // state that races with Worker::is_available_to.
        self.lock.lock();
        sp.lock();

        master.searching.store(true, Ordering::Release);
        master.split_count.fetch_sub(1, Ordering::Release);
        sp.slaves.reset(master.index);

        let state = sp.state_mut();
        master.set_active_split(state.parent.take());
        pos.set_nodes_searched(pos.nodes_searched() + sp.nodes());
        *req.best_move = state.best_move;
        let best_value = state.best_value;
        state.move_picker = None;
        state.pos = None;

        sp.unlock();
        unsafe { self.lock.unlock() };

        best_value
    }

    /// Front-end barrier: returns once the main worker has gone back to
    /// sleep after its current search, immediately if none is running.
    pub fn wait_for_think_finished(&self) {
        let main = self.main();
        let guard = main.park_lock.lock().unwrap();
        let _guard = self
            .cond
            .wait_while(guard, |_| main.thinking.load(Ordering::Acquire))
            .unwrap();
    }

    /// Publishes a new search and wakes the main worker, returning
    /// immediately. `allowed_moves`, when non-empty, restricts the root
    /// moves the search may consider.
    pub fn start_thinking(
        &self,
        pos: &Position,
        limits: &Limits,
        allowed_moves: &[Move],
        states: StateHistory,
    ) {
        self.wait_for_think_finished();

        let mut search = self.search_state.lock().unwrap();
        search.start_time = Instant::now();

        self.signals.stop_on_ponderhit.store(false, Ordering::Relaxed);
        self.signals.first_root_move.store(false, Ordering::Relaxed);
        self.signals.stop.store(false, Ordering::Relaxed);
        self.signals.failed_low_at_root.store(false, Ordering::Relaxed);

        search.root_pos = pos.clone();
        search.limits = limits.clone();
        search.states = Some(states);
        search.root_moves.clear();
        for &mv in pos.legal_moves() {
            if allowed_moves.is_empty() || allowed_moves.contains(&mv) {
                search.root_moves.push(RootMove::new(mv));
            }
        }
        drop(search);

        for worker in &self.state().workers {
            worker.max_ply.store(0, Ordering::Relaxed);
        }

        let main = self.main();
        main.thinking.store(true, Ordering::Release);
        main.notify();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.exit();
    }
}
