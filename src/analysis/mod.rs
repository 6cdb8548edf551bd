//! Per-routine control flow analyses
//!
//! Results are computed fresh for one routine and go stale as soon as the
//! routine is rewritten. Nothing here is cached between transformations.

pub mod dominators;
pub mod loops;
pub mod regions;

pub use dominators::{DominatorTree, PostDominatorTree};
pub use loops::{Loop, LoopId, LoopInfo};
pub use regions::{Region, RegionInfo};
