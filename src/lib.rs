//! # roofline-instr - Roofline Loop Instrumentation
//!
//! Rewrites SSA routines so every outermost loop can report, at run time,
//! the bytes it loaded and stored and the scalar and vector operations it
//! executed. One binary serves both modes: a runtime flag selects between
//! the original loop and an instrumented copy.
//!
//! ## Instrumentation Pipeline
//!
//! ```text
//! Routine
//!     ↓ [Loop Analysis]        dominators, natural loops, SESE regions
//! Eligible Outermost Loops
//!     ↓ [Region Extraction]    loop region → <routine>.roofline.loop
//! Outlined Call Site
//!     ↓ [Dual Path]            dispatch → original | instrumented → merge
//! Instrumented Clone
//!     ↓ [Stats Accumulation]   static per-block counts → stack record
//!     ↓ [Protocol Emission]    begin / end / stats / is_enabled calls
//! Verified Module
//! ```
//!
//! ## Usage as a Library
//!
//! ```ignore
//! use roofline_instr::{InstrumentConfig, RooflinePass};
//!
//! let config = InstrumentConfig::from_env();
//! let mut pass = RooflinePass::new(config);
//! let summary = pass.run_on_module(&mut module);
//! ```

// Program representation and analyses
pub mod ir;
pub mod analysis;

// The pass
pub mod instrument;
pub mod verify;

// Reporting and configuration
pub mod diagnostics;
pub mod config;

// Execution of transformed programs
pub mod interp;

pub use config::{InstrumentConfig, ProtocolSymbols, VerifyFailureAction};
pub use diagnostics::{Diagnostic, DiagnosticSink, LogSink, Severity, SkipReason};
pub use instrument::{Counter, LoopIdentity, PassSummary, PreservedAnalyses, RooflinePass, StatsRecord};
pub use interp::{ExecError, Interpreter, Runtime, Val};
pub use ir::{Module, Routine};
pub use verify::{verify_module, verify_routine, VerificationFailed, VerifyError};
