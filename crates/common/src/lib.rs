//! Domain model and policy for tiercache
//!
//! Everything here is independent of the registry's storage engine and of
//! the service runtime: types, topology detection, link strategy, priority
//! scoring, capacity limits, path mapping and content signatures.

pub mod capacity;
pub mod layout;
pub mod path_map;
pub mod priority;
pub mod provider;
pub mod signature;
pub mod strategy;
pub mod topology;
pub mod types;

pub mod prelude {
    pub use crate::capacity::CacheLimit;
    pub use crate::layout::CacheLayout;
    pub use crate::path_map::{PathMapper, PathMapping};
    pub use crate::priority::{PriorityPolicy, ScoreContext, ScoredEntry, VictimSelection};
    pub use crate::provider::{
        Candidate, CandidateProvider, PlaybackSession, ProviderError, SessionProvider,
    };
    pub use crate::signature::ContentSignature;
    pub use crate::strategy::{LinkStrategist, StrategyError};
    pub use crate::topology::{MountRoots, Topology, TopologyKind};
    pub use crate::types::{
        CacheEntry, CacheReason, EntryStatus, LinkKind, OperationKind, OperationLogEntry,
        OperationOutcome, UserAttribution,
    };
}
