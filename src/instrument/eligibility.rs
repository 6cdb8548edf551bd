//! Loop selection
//!
//! Only outermost loops are candidates. A candidate also needs a preheader
//! that sits outside every loop and a single exit block; the rest are
//! reported and left alone.

use crate::analysis::{LoopId, LoopInfo};
use crate::diagnostics::{Diagnostic, DiagnosticSink, SkipReason};
use crate::ir::{BlockId, Routine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibleLoop {
    pub id: LoopId,
    pub header: BlockId,
    pub preheader: BlockId,
    pub exit: BlockId,
}

/// Splits the outermost loops of `routine` into eligible ones (returned)
/// and skipped ones (reported to `sink`)
pub fn eligible_loops<S: DiagnosticSink>(
    routine: &Routine,
    loops: &LoopInfo,
    sink: &mut S,
) -> Vec<EligibleLoop> {
    let mut eligible = Vec::new();
    for (id, lp) in loops.top_level() {
        let preheader = lp
            .preheader(routine)
            .filter(|p| loops.innermost_loop_for(*p).is_none());
        let Some(preheader) = preheader else {
            sink.report(Diagnostic::skipped(&routine.name, lp.loc_str(routine), SkipReason::NoPreheader));
            continue;
        };

        let exits = lp.exit_blocks(routine);
        let [exit] = exits.as_slice() else {
            sink.report(Diagnostic::skipped(
                &routine.name,
                lp.loc_str(routine),
                SkipReason::NoUniqueExit { exits: exits.len() },
            ));
            continue;
        };

        eligible.push(EligibleLoop { id, header: lp.header, preheader, exit: *exit });
    }
    eligible
}
