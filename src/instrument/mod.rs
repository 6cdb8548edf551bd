//! # Roofline Instrumentation
//!
//! Rewrites every eligible outermost loop of a routine so that, when the
//! runtime asks for it, the loop reports the bytes it moved and the
//! operations it executed.
//!
//! ## Per loop:
//! 1. **Eligibility**: outermost, one preheader, one exit block
//! 2. **Extraction**: the smallest single-entry single-exit region around
//!    the loop moves into `<routine>.roofline.loop`
//! 3. **Dual path**: a clone `<..>.instrumented` takes the loop handle as an
//!    extra parameter; the call site dispatches between the two
//! 4. **Stats**: every loop block of the clone adds its static counts to a
//!    stack record that is reported before the clone returns
//! 5. **Verification**: the clone, the extracted routine and the host are
//!    checked; a failure is fatal
//!
//! Routines carrying the generation tag are never touched again, so running
//! the pass twice is the same as running it once.

pub mod classify;
pub mod dual_path;
pub mod eligibility;
pub mod extract;
pub mod protocol;
pub mod stats;

pub use classify::{Classifier, OpKind};
pub use dual_path::{build_dual_path, clone_instrumented, DualPath};
pub use eligibility::{eligible_loops, EligibleLoop};
pub use extract::{extract_region, ExtractError, ExtractedRegion};
pub use protocol::{LoopIdentity, ProtocolDecls};
pub use stats::{Counter, StatsAccumulator, StatsDelta, StatsRecord};

use crate::analysis::{DominatorTree, LoopInfo, PostDominatorTree, RegionInfo};
use crate::config::InstrumentConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, LogSink, SkipReason};
use crate::ir::{BlockId, Module, RoutineId};
use crate::verify;

/// Which analysis results survive a run over one routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedAnalyses {
    All,
    None,
}

/// Outcome of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub instrumented: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for PassSummary {
    fn add_assign(&mut self, other: PassSummary) {
        self.instrumented += other.instrumented;
        self.skipped += other.skipped;
    }
}

/// Counts what passes through to the real sink
struct CountingSink<'s, S> {
    inner: &'s mut S,
    reported: usize,
}

impl<S: DiagnosticSink> DiagnosticSink for CountingSink<'_, S> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.reported += 1;
        self.inner.report(diagnostic);
    }
}

pub struct RooflinePass<S: DiagnosticSink = LogSink> {
    config: InstrumentConfig,
    sink: S,
}

impl RooflinePass<LogSink> {
    pub fn new(config: InstrumentConfig) -> Self {
        RooflinePass { config, sink: LogSink }
    }
}

impl Default for RooflinePass<LogSink> {
    fn default() -> Self {
        Self::new(InstrumentConfig::default())
    }
}

impl<S: DiagnosticSink> RooflinePass<S> {
    pub fn with_sink(config: InstrumentConfig, sink: S) -> Self {
        RooflinePass { config, sink }
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Instruments every routine that exists when the run starts
    pub fn run_on_module(&mut self, module: &mut Module) -> PassSummary {
        let decls = ProtocolDecls::declare(module, &self.config.symbols);
        let mut summary = PassSummary::default();
        for rid in module.routine_ids() {
            let (_, routine_summary) = self.instrument_routine(module, rid, &decls);
            summary += routine_summary;
        }
        log::debug!(
            "module `{}`: {} loops instrumented, {} skipped",
            module.name,
            summary.instrumented,
            summary.skipped
        );
        summary
    }

    /// Instruments one routine, declaring the runtime symbols if needed
    pub fn run_on_routine(&mut self, module: &mut Module, rid: RoutineId) -> PreservedAnalyses {
        if self.is_excluded(module, rid) {
            return PreservedAnalyses::All;
        }
        let decls = ProtocolDecls::declare(module, &self.config.symbols);
        self.instrument_routine(module, rid, &decls).0
    }

    fn is_excluded(&self, module: &Module, rid: RoutineId) -> bool {
        let routine = module.routine(rid);
        routine.is_declaration() || routine.has_metadata(&self.config.generated_tag)
    }

    fn instrument_routine(
        &mut self,
        module: &mut Module,
        rid: RoutineId,
        decls: &ProtocolDecls,
    ) -> (PreservedAnalyses, PassSummary) {
        let mut summary = PassSummary::default();
        if self.is_excluded(module, rid) {
            return (PreservedAnalyses::All, summary);
        }

        let headers: Vec<BlockId> = {
            let routine = module.routine(rid);
            let dt = DominatorTree::compute(routine);
            let loops = LoopInfo::compute(routine, &dt);
            let mut sink = CountingSink { inner: &mut self.sink, reported: 0 };
            let eligible = eligible_loops(routine, &loops, &mut sink);
            summary.skipped += sink.reported;
            eligible.into_iter().map(|l| l.header).collect()
        };

        for header in headers {
            match self.instrument_loop(module, rid, header, decls) {
                Ok(true) => summary.instrumented += 1,
                Ok(false) => {}
                Err(reason) => {
                    summary.skipped += 1;
                    let routine = module.routine(rid);
                    let location = loop_location(module, rid, header);
                    self.sink.report(Diagnostic::skipped(&routine.name, location, reason));
                }
            }
        }

        let preserved = if summary.instrumented > 0 {
            PreservedAnalyses::None
        } else {
            PreservedAnalyses::All
        };
        (preserved, summary)
    }

    /// `Ok(false)` when an earlier extraction already swallowed the loop
    fn instrument_loop(
        &mut self,
        module: &mut Module,
        rid: RoutineId,
        header: BlockId,
        decls: &ProtocolDecls,
    ) -> Result<bool, SkipReason> {
        let routine = module.routine(rid);
        if !routine.is_attached(header) {
            return Ok(false);
        }

        // Earlier rewrites invalidated every analysis
        let dt = DominatorTree::compute(routine);
        let pdt = PostDominatorTree::compute(routine);
        let loops = LoopInfo::compute(routine, &dt);
        let Some(id) = loops.loop_for_header(header) else {
            return Ok(false);
        };
        let lp = loops.get(id);
        if !lp.is_outermost() {
            return Ok(false);
        }

        let identity = LoopIdentity::of_loop(routine, lp);
        let region = RegionInfo::new(routine, &dt, &pdt)
            .region_for_loop(lp)
            .ok_or(SkipReason::NoRegion)?;
        log::debug!(
            "`{}`: loop at {} outlined as region {} -> {}",
            routine.name,
            lp.loc_str(routine),
            region.entry,
            region.exit
        );

        let extracted = extract_region(module, rid, &region, &self.config.generated_tag)
            .map_err(|e| SkipReason::ExtractionFailed(e.to_string()))?;
        let instrumented = clone_instrumented(module, extracted.callee);
        build_dual_path(module, rid, &extracted, instrumented, decls, &identity).ok_or_else(|| {
            SkipReason::ExtractionFailed("call site does not end in a branch".to_string())
        })?;

        self.emit_counting(module, instrumented, decls);

        let action = self.config.on_verify_failure;
        for routine in [instrumented, extracted.callee, rid] {
            verify::enforce(module, routine, action);
        }
        Ok(true)
    }

    /// Record allocation, per-block accumulation and the stats call
    fn emit_counting(&self, module: &mut Module, instrumented: RoutineId, decls: &ProtocolDecls) {
        let data_layout = module.data_layout;
        let classifier = Classifier::new(&data_layout, self.config.scalable_lane_estimate);
        let accumulator = StatsAccumulator::new(classifier, self.config.skip_zero_deltas);

        let routine = module.routine_mut(instrumented);
        let loop_blocks: Vec<BlockId> = {
            let dt = DominatorTree::compute(routine);
            let loops = LoopInfo::compute(routine, &dt);
            loops
                .top_level()
                .flat_map(|(_, lp)| lp.blocks().iter().copied())
                .collect()
        };
        if loop_blocks.is_empty() {
            log::debug!("`{}` has no loop left to count", routine.name);
        }

        let Some(record) = accumulator.allocate_record(routine) else {
            return;
        };
        let total = accumulator.accumulate(routine, record, &loop_blocks);
        let calls = protocol::emit_stats_calls(routine, decls, record);
        log::debug!(
            "`{}`: {} loop blocks counted, static totals {:?}, {} stats calls",
            routine.name,
            loop_blocks.len(),
            total.counts(),
            calls
        );
    }
}

fn loop_location(module: &Module, rid: RoutineId, header: BlockId) -> String {
    let routine = module.routine(rid);
    if !routine.is_attached(header) {
        return "<unknown>".to_string();
    }
    let dt = DominatorTree::compute(routine);
    let loops = LoopInfo::compute(routine, &dt);
    loops
        .loop_for_header(header)
        .map(|id| loops.get(id).loc_str(routine))
        .unwrap_or_else(|| "<unknown>".to_string())
}
