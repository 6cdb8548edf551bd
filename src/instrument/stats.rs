//! Stats record layout and counter accumulation
//!
//! Every instrumented routine owns one stack-resident record of nine `u64`
//! counters. Each loop block adds its static per-counter totals to the record
//! right before its terminator.

use std::fmt;
use std::ops::{AddAssign, Index};

use super::classify::Classifier;
use crate::ir::{BlockId, Builder, Constant, InstId, Intrinsic, Routine, Type, Value};

/// Number of counters in a stats record
pub const COUNTER_COUNT: usize = 9;

/// Size of the record in memory
pub const STATS_RECORD_BYTES: u64 = 8 * COUNTER_COUNT as u64;

/// Counter slots, in record order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    /// Reserved, never written
    TripCount = 0,
    BytesLoaded,
    BytesStored,
    ScalarIntOps,
    ScalarFloatOps,
    ScalarDoubleOps,
    VectorIntOps,
    VectorFloatOps,
    VectorDoubleOps,
}

impl Counter {
    pub const ALL: [Counter; COUNTER_COUNT] = [
        Counter::TripCount,
        Counter::BytesLoaded,
        Counter::BytesStored,
        Counter::ScalarIntOps,
        Counter::ScalarFloatOps,
        Counter::ScalarDoubleOps,
        Counter::VectorIntOps,
        Counter::VectorFloatOps,
        Counter::VectorDoubleOps,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Counter::TripCount => "trip_count",
            Counter::BytesLoaded => "bytes_loaded",
            Counter::BytesStored => "bytes_stored",
            Counter::ScalarIntOps => "scalar_int_ops",
            Counter::ScalarFloatOps => "scalar_float_ops",
            Counter::ScalarDoubleOps => "scalar_double_ops",
            Counter::VectorIntOps => "vector_int_ops",
            Counter::VectorFloatOps => "vector_float_ops",
            Counter::VectorDoubleOps => "vector_double_ops",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-counter amounts attributed to an instruction or a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsDelta([u64; COUNTER_COUNT]);

impl StatsDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(counter: Counter, amount: u64) -> Self {
        let mut delta = Self::new();
        delta.add(counter, amount);
        delta
    }

    pub fn add(&mut self, counter: Counter, amount: u64) {
        self.0[counter.index()] += amount;
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.0[counter.index()]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|c| *c == 0)
    }

    pub fn counts(&self) -> &[u64; COUNTER_COUNT] {
        &self.0
    }
}

impl AddAssign for StatsDelta {
    fn add_assign(&mut self, other: StatsDelta) {
        for (lhs, rhs) in self.0.iter_mut().zip(other.0) {
            *lhs += rhs;
        }
    }
}

impl Index<Counter> for StatsDelta {
    type Output = u64;

    fn index(&self, counter: Counter) -> &u64 {
        &self.0[counter.index()]
    }
}

/// In-memory layout of the record handed to `notify_loop_stats`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsRecord {
    pub trip_count: u64,
    pub bytes_loaded: u64,
    pub bytes_stored: u64,
    pub scalar_int_ops: u64,
    pub scalar_float_ops: u64,
    pub scalar_double_ops: u64,
    pub vector_int_ops: u64,
    pub vector_float_ops: u64,
    pub vector_double_ops: u64,
}

impl StatsRecord {
    pub fn from_counters(c: [u64; COUNTER_COUNT]) -> Self {
        StatsRecord {
            trip_count: c[0],
            bytes_loaded: c[1],
            bytes_stored: c[2],
            scalar_int_ops: c[3],
            scalar_float_ops: c[4],
            scalar_double_ops: c[5],
            vector_int_ops: c[6],
            vector_float_ops: c[7],
            vector_double_ops: c[8],
        }
    }

    pub fn counters(&self) -> [u64; COUNTER_COUNT] {
        [
            self.trip_count,
            self.bytes_loaded,
            self.bytes_stored,
            self.scalar_int_ops,
            self.scalar_float_ops,
            self.scalar_double_ops,
            self.vector_int_ops,
            self.vector_float_ops,
            self.vector_double_ops,
        ]
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters()[counter.index()]
    }
}

/// The record as an IR struct type
pub fn stats_record_type() -> Type {
    Type::Struct(vec![Type::i64(); COUNTER_COUNT])
}

/// Emits the counting code of one instrumented routine
pub struct StatsAccumulator<'a> {
    classifier: Classifier<'a>,
    skip_zero_deltas: bool,
}

impl<'a> StatsAccumulator<'a> {
    pub fn new(classifier: Classifier<'a>, skip_zero_deltas: bool) -> Self {
        StatsAccumulator { classifier, skip_zero_deltas }
    }

    /// Allocates the record at the top of the entry block and zeroes it
    pub fn allocate_record(&self, routine: &mut Routine) -> Option<InstId> {
        let entry = routine.entry_block()?;
        let mut builder = Builder::at_first_insertion_point(routine, entry);
        let record = builder.alloca(stats_record_type());
        builder.intrinsic(
            Intrinsic::MemSet,
            vec![
                Value::Inst(record),
                Value::Const(Constant::int(8, 0)),
                Value::i64(STATS_RECORD_BYTES as i64),
            ],
        );
        Some(record)
    }

    /// Adds each block's static totals to `record` in front of its
    /// terminator. Returns the sum over all blocks.
    pub fn accumulate(&self, routine: &mut Routine, record: InstId, blocks: &[BlockId]) -> StatsDelta {
        let fields = vec![Type::i64(); COUNTER_COUNT];

        let mut total = StatsDelta::new();
        for &block in blocks {
            // Classify before any counting code lands in the block
            let delta = self.classifier.classify_block(routine, block);
            total += delta;

            let mut builder = Builder::at_end(routine, block);
            for counter in Counter::ALL.into_iter().skip(1) {
                let amount = delta.get(counter);
                if amount == 0 && self.skip_zero_deltas {
                    continue;
                }
                let slot = builder.field_addr(&fields, Value::Inst(record), counter.index() as u32);
                let old = builder.load(Type::i64(), Value::Inst(slot));
                let new = builder.add(Value::Inst(old), Value::i64(amount as i64));
                builder.store(Value::Inst(new), Value::Inst(slot));
            }
            log::trace!("{} in `{}` adds {:?}", block, routine.name, delta.counts());
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DataLayout;

    #[test]
    fn test_record_layout() {
        assert_eq!(std::mem::size_of::<StatsRecord>() as u64, STATS_RECORD_BYTES);
        let dl = DataLayout::default();
        assert_eq!(dl.alloc_size(&stats_record_type()), STATS_RECORD_BYTES);
        let fields = vec![Type::i64(); COUNTER_COUNT];
        assert_eq!(dl.field_offset(&fields, Counter::VectorDoubleOps.index()), 64);
    }

    #[test]
    fn test_delta_accumulates() {
        let mut delta = StatsDelta::of(Counter::BytesLoaded, 8);
        delta += StatsDelta::of(Counter::BytesLoaded, 4);
        delta += StatsDelta::of(Counter::ScalarIntOps, 1);
        assert_eq!(delta[Counter::BytesLoaded], 12);
        assert_eq!(delta[Counter::ScalarIntOps], 1);
        assert_eq!(delta[Counter::TripCount], 0);
        assert!(!delta.is_zero());
    }
}
