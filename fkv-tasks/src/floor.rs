//! # Thread Floor
//!
//! Process-wide minimum thread counts requested by tasks. Every task carries
//! a hint; applying it only ever raises the recorded floor, so concurrent
//! tasks with different hints converge on the largest request.
//!
//! Consumers that size worker sets (the bench harness, embedding hosts) read
//! the floor with `current()`.

use std::sync::atomic::{AtomicUsize, Ordering};

use fkv_common::TaskOptions;

static MIN_WORKERS: AtomicUsize = AtomicUsize::new(0);
static MIN_IO_COMPLETION: AtomicUsize = AtomicUsize::new(0);

/// Effective process-wide minimums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadFloor {
    pub workers: usize,
    pub io_completion: usize,
}

/// Raises the floor to at least the requested values. Never lowers it.
pub fn raise(workers: usize, io_completion: usize) -> ThreadFloor {
    let previous_workers = MIN_WORKERS.fetch_max(workers, Ordering::AcqRel);
    let previous_io = MIN_IO_COMPLETION.fetch_max(io_completion, Ordering::AcqRel);
    let floor = ThreadFloor {
        workers: previous_workers.max(workers),
        io_completion: previous_io.max(io_completion),
    };
    if previous_workers < workers || previous_io < io_completion {
        tracing::debug!(
            workers = floor.workers,
            io_completion = floor.io_completion,
            "raised thread floor"
        );
    }
    floor
}

/// Applies a task's hint.
pub fn apply(options: &TaskOptions) -> ThreadFloor {
    raise(options.workers, options.input_output_completion_ports)
}

/// Reads the current floor.
pub fn current() -> ThreadFloor {
    ThreadFloor {
        workers: MIN_WORKERS.load(Ordering::Acquire),
        io_completion: MIN_IO_COMPLETION.load(Ordering::Acquire),
    }
}
