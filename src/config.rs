//! Instrumentation configuration

use std::env;
use std::fmt;

use crate::verify::VerificationFailed;

/// Default prefix of the runtime entry points
pub const DEFAULT_SYMBOL_PREFIX: &str = "mperf_roofline_internal_";

/// Default metadata key marking routines this crate created
pub const DEFAULT_GENERATED_TAG: &str = "roofline.generated";

/// Names of the four runtime entry points the pass calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSymbols {
    pub loop_begin: String,
    pub loop_end: String,
    pub loop_stats: String,
    pub is_enabled: String,
}

impl ProtocolSymbols {
    pub fn with_prefix(prefix: &str) -> Self {
        ProtocolSymbols {
            loop_begin: format!("{}notify_loop_begin", prefix),
            loop_end: format!("{}notify_loop_end", prefix),
            loop_stats: format!("{}notify_loop_stats", prefix),
            is_enabled: format!("{}is_instrumented_profiling", prefix),
        }
    }
}

impl Default for ProtocolSymbols {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_SYMBOL_PREFIX)
    }
}

/// What happens when a transformed routine fails verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyFailureAction {
    /// Log and abort the process
    #[default]
    Abort,
    /// Log and panic, unwinding into the embedder
    Panic,
}

impl VerifyFailureAction {
    /// Never returns: a malformed routine must not reach code generation
    pub fn fail(self, failure: &VerificationFailed) -> ! {
        log::error!("{}", failure);
        match self {
            VerifyFailureAction::Abort => std::process::abort(),
            VerifyFailureAction::Panic => panic!("{}", failure),
        }
    }
}

impl fmt::Display for VerifyFailureAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerifyFailureAction::Abort => write!(f, "abort"),
            VerifyFailureAction::Panic => write!(f, "panic"),
        }
    }
}

/// Configuration for the roofline instrumentation pass
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    /// Runtime entry points
    pub symbols: ProtocolSymbols,
    /// Metadata key set on every generated routine
    pub generated_tag: String,
    /// Leave out accumulation code for counters a block does not touch
    pub skip_zero_deltas: bool,
    /// Lane multiplier assumed for scalable vectors
    pub scalable_lane_estimate: u64,
    pub on_verify_failure: VerifyFailureAction,
}

impl InstrumentConfig {
    pub fn new() -> Self {
        InstrumentConfig {
            symbols: ProtocolSymbols::default(),
            generated_tag: DEFAULT_GENERATED_TAG.to_string(),
            skip_zero_deltas: true,
            scalable_lane_estimate: 8,
            on_verify_failure: VerifyFailureAction::Abort,
        }
    }

    /// Defaults overridden by `ROOFLINE_SYMBOL_PREFIX` and
    /// `ROOFLINE_EMIT_ZERO_DELTAS`
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(prefix) = env::var("ROOFLINE_SYMBOL_PREFIX") {
            config = config.with_symbol_prefix(&prefix);
        }
        if let Ok(value) = env::var("ROOFLINE_EMIT_ZERO_DELTAS") {
            config.skip_zero_deltas = !matches!(value.as_str(), "1" | "true" | "yes");
        }
        config
    }

    pub fn with_symbol_prefix(mut self, prefix: &str) -> Self {
        self.symbols = ProtocolSymbols::with_prefix(prefix);
        self
    }

    pub fn with_symbols(mut self, symbols: ProtocolSymbols) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_generated_tag(mut self, tag: &str) -> Self {
        self.generated_tag = tag.to_string();
        self
    }

    pub fn with_skip_zero_deltas(mut self, skip: bool) -> Self {
        self.skip_zero_deltas = skip;
        self
    }

    pub fn with_scalable_lane_estimate(mut self, lanes: u64) -> Self {
        self.scalable_lane_estimate = lanes.max(1);
        self
    }

    pub fn with_verify_failure(mut self, action: VerifyFailureAction) -> Self {
        self.on_verify_failure = action;
        self
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_symbols() {
        let symbols = ProtocolSymbols::default();
        assert_eq!(symbols.loop_begin, "mperf_roofline_internal_notify_loop_begin");
        assert_eq!(symbols.is_enabled, "mperf_roofline_internal_is_instrumented_profiling");
    }

    #[test]
    fn test_builder() {
        let config = InstrumentConfig::new()
            .with_symbol_prefix("rt_")
            .with_skip_zero_deltas(false)
            .with_scalable_lane_estimate(0);
        assert_eq!(config.symbols.loop_end, "rt_notify_loop_end");
        assert!(!config.skip_zero_deltas);
        assert_eq!(config.scalable_lane_estimate, 1);
        assert_eq!(config.on_verify_failure, VerifyFailureAction::Abort);
    }
}
