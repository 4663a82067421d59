//! Atomic tiering between bulk storage and the cache
//!
//! The operator moves bytes and swaps directory entries; the registry records
//! the result. A canonical path is never observed missing: originals are kept
//! at a backup name until the new link is verified, and every replacement is
//! a `rename(2)` over the existing name.

mod error;
pub mod fsops;
mod operator;
mod recovery;

pub use error::{FailureCounters, TierError};
pub use operator::{
    DemoteOutcome, EvictionReport, OperatorSettings, PromoteOutcome, PromoteRequest,
    TieringOperator, TransferLimits,
};
pub use recovery::{RecoveryReport, SweepReport};
