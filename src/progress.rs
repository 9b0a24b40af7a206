//! Progress reporting (§9 Design Notes' ambient-stack supplement; grounded
//! in `format.rs`'s `DemuxerContext::queue_info` pull, generalized to a
//! pull rather than a channel since this engine is single-threaded). Picks
//! the single most informative input to report on, per [`DemuxerImpl::display_priority`],
//! rather than printing a line per input every tick.
//!
//! No cancellation API beyond process termination on a fatal error is
//! offered (SPEC_FULL §5): a cooperative flag is enough for the one place
//! that could plausibly want to stop early (a future interactive frontend),
//! and nothing in this crate currently sets it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::scheduler::Input;

/// A shared flag a caller could set to ask the next scheduler iteration to
/// stop. Nothing in this crate sets it today; it exists so an embedder
/// driving the engine from a UI thread has somewhere to hook in without
/// this crate growing a signal-handling dependency it doesn't otherwise need.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Picks the highest-`display_priority` input still producing data and
/// renders its one-line status, or `None` if every input is drained.
pub fn tick(inputs: &mut [Input]) -> Option<String> {
    let mut best: Option<usize> = None;
    for (i, input) in inputs.iter().enumerate() {
        if input.packetizers.iter().all(|p| p.is_drained()) {
            continue;
        }
        let better = match best {
            None => true,
            Some(b) => input.demuxer.display_priority() > inputs[b].demuxer.display_priority(),
        };
        if better {
            best = Some(i);
        }
    }

    let idx = best?;
    let input = &mut inputs[idx];
    Some(input.demuxer.display_progress(&mut input.reader))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cancel_flag_starts_clear_and_latches_once_set() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn cancel_flag_clone_shares_state() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
