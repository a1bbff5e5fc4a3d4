//! Search-facing scaffolding around the worker pool.
//!
//! The search algorithm itself lives outside this crate; it plugs into the
//! pool through [`SearchDriver`] and reads the per-search state the pool
//! publishes here.

pub mod spinlock;
pub mod threading;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use crate::constants::MAX_WORKERS;
use crate::position::Position;
use crate::types::{Depth, Move, VALUE_INFINITE, Value};

pub use threading::{SplitPoint, SplitRequest, ThreadPool, Worker};

/// The collaborator seam: everything the pool needs from the search.
///
/// Implementations are handed to [`ThreadPool::new`] before `init`, so a
/// driver can rely on the rest of the engine being ready when the first
/// callback arrives.
pub trait SearchDriver: Send + Sync + 'static {
    /// Root search. Runs on the main worker once per think request, after
    /// `start_thinking` has published the root position, limits and root
    /// moves in the pool's [`SearchState`].
    fn think(&self, pool: &Arc<ThreadPool>, worker: &Arc<Worker>);

    /// Search at a split point. Called with `worker.searching()` set and
    /// `worker.active_split()` equal to `sp`; pulls moves from the shared
    /// picker and updates the split point under its lock. Returns the
    /// number of nodes this participant searched, which the pool folds
    /// into `sp.nodes`.
    fn search_at(&self, pool: &Arc<ThreadPool>, worker: &Arc<Worker>, sp: &Arc<SplitPoint>) -> u64;

    /// Body of the periodic time check, invoked from the timer worker
    /// every `msec` milliseconds while an interval is set.
    fn check_time(&self, pool: &Arc<ThreadPool>);
}

/// Tuning parameters the pool reads on `init` and `apply_config`.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Total worker count, main worker included. Must be at least 1.
    pub workers: usize,
    /// Upper bound on participants at one split point, master included.
    pub max_slaves_per_split: usize,
    /// Minimum remaining depth for the search to consider splitting.
    pub min_split_depth: Depth,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: num_cpus::get().min(MAX_WORKERS),
            max_slaves_per_split: 5,
            min_split_depth: 4,
        }
    }
}

/// Stop flags read cooperatively by the search; the pool clears them all
/// in `start_thinking` and never sets them itself.
#[derive(Default)]
pub struct Signals {
    pub stop: AtomicBool,
    pub stop_on_ponderhit: AtomicBool,
    pub first_root_move: AtomicBool,
    pub failed_low_at_root: AtomicBool,
}

/// Constraints for one search, as parsed from the front-end's go command.
#[derive(Clone, Debug, Default)]
pub struct Limits {
    /// Remaining clock time per side, milliseconds.
    pub time: [u64; 2],
    /// Increment per side, milliseconds.
    pub inc: [u64; 2],
    pub movestogo: u32,
    pub depth: Depth,
    pub nodes: u64,
    pub move_time: u64,
    pub infinite: bool,
    pub ponder: bool,
}

impl Limits {
    /// True when the clock, not an explicit bound, should end the search.
    pub fn use_time_management(&self) -> bool {
        self.move_time == 0 && self.depth == 0 && self.nodes == 0 && !self.infinite
    }
}

/// A root move and its per-iteration scores.
#[derive(Clone, Debug)]
pub struct RootMove {
    pub mv: Move,
    /// Best score found for this move in the current iteration.
    pub score: Value,
    /// Score from the previous iteration, kept for aspiration windows.
    pub prev_score: Value,
    /// Principal variation starting with `mv`.
    pub pv: Vec<Move>,
}

impl RootMove {
    pub fn new(mv: Move) -> RootMove {
        RootMove {
            mv,
            score: -VALUE_INFINITE,
            prev_score: -VALUE_INFINITE,
            pv: vec![mv],
        }
    }
}

/// One frame of the search stack. A split point stores the master's frame
/// by value so slaves start from the same node context.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stack {
    pub ply: i32,
    pub current_move: Move,
    pub excluded_move: Move,
    pub killers: [Move; 2],
    pub static_eval: Value,
    pub skip_null_move: bool,
}

/// State record accumulated while playing moves to the root position; the
/// front-end hands the whole stack over in `start_thinking`.
#[derive(Clone, Debug, Default)]
pub struct StateInfo {
    pub key: u64,
    pub rule50: i32,
}

#[derive(Debug, Default)]
pub struct StateHistory(pub Vec<StateInfo>);

/// Per-search state published by `start_thinking` and read by the driver.
pub struct SearchState {
    pub root_pos: Position,
    pub limits: Limits,
    pub root_moves: Vec<RootMove>,
    /// Ownership of the game's state history, transferred from the
    /// front-end for the duration of the search.
    pub states: Option<StateHistory>,
    pub start_time: Instant,
}

impl SearchState {
    pub(crate) fn new() -> SearchState {
        SearchState {
            root_pos: Position::default(),
            limits: Limits::default(),
            root_moves: Vec::new(),
            states: None,
            start_time: Instant::now(),
        }
    }
}
