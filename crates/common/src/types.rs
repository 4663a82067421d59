//! Core data model for tiered media files
//!
//! These types are shared between the registry (which persists them), the
//! tiering operator (which produces them) and the priority engine (which
//! ranks them). Every enum has a stable lowercase text form used both on the
//! wire and in the SQLite schema.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Error returned when a stored or submitted label does not name a variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label: {label}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub label: String,
}

/// Declares a fieldless enum with a fixed text label per variant, plus
/// `as_str`, `FromStr` and `Display` implementations over those labels.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseLabelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok($name::$variant), )+
                    other => Err(ParseLabelError {
                        kind: $kind,
                        label: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

labelled_enum! {
    /// Filesystem technique keeping a canonical path resolvable after promotion
    LinkKind, "link kind" {
        Hardlink => "hardlink",
        Symlink => "symlink",
        /// The canonical file is left in place and the cache holds a second copy
        Copy => "copy",
    }
}

labelled_enum! {
    /// Lifecycle state of a cache entry
    EntryStatus, "entry status" {
        Active => "active",
        /// Registry says active but the cached bytes are gone
        Orphaned => "orphaned",
        PendingRemoval => "pending_removal",
        Removed => "removed",
    }
}

labelled_enum! {
    /// Why a file was cached
    CacheReason, "cache reason" {
        OnDeck => "ondeck",
        Watchlist => "watchlist",
        ActiveWatching => "active_watching",
        ImportList => "import_list",
        Manual => "manual",
    }
}

labelled_enum! {
    /// Kind of state transition recorded in the operation log
    OperationKind, "operation kind" {
        Promote => "promote",
        Demote => "demote",
        Evict => "evict",
        Attribute => "attribute",
        Deattribute => "deattribute",
        /// Status change made by the integrity sweep or crash recovery
        Sweep => "sweep",
    }
}

labelled_enum! {
    /// Whether a logged operation succeeded
    OperationOutcome, "operation outcome" {
        Ok => "ok",
        Failed => "failed",
    }
}

impl CacheReason {
    /// Base priority contributed by this reason.
    pub fn base_score(&self) -> u32 {
        match self {
            CacheReason::OnDeck | CacheReason::ActiveWatching => 20,
            CacheReason::Watchlist => 10,
            CacheReason::ImportList => 5,
            CacheReason::Manual => 0,
        }
    }

    /// Reasons refreshed wholesale by each reconciliation cycle.
    pub fn is_provider_managed(&self) -> bool {
        matches!(
            self,
            CacheReason::OnDeck | CacheReason::Watchlist | CacheReason::ImportList
        )
    }
}

impl EntryStatus {
    pub fn is_live(&self) -> bool {
        !matches!(self, EntryStatus::Removed)
    }
}

/// One tracked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: i64,
    /// Server-visible path
    pub canonical_path: PathBuf,
    /// Location of the physical bytes inside cache storage
    pub cached_path: PathBuf,
    pub link_kind: LinkKind,
    pub status: EntryStatus,
    pub triggered_by_reason: CacheReason,
    pub size_bytes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_access_at: OffsetDateTime,
}

/// A user (and reason) justifying that a file stays cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttribution {
    pub user_id: String,
    pub canonical_path: PathBuf,
    pub attribution_reason: CacheReason,
    #[serde(with = "time::serde::rfc3339")]
    pub attributed_at: OffsetDateTime,
}

/// Immutable audit row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: i64,
    pub canonical_path: PathBuf,
    pub operation: OperationKind,
    pub actor: String,
    pub status_before: Option<EntryStatus>,
    pub status_after: Option<EntryStatus>,
    pub outcome: OperationOutcome,
    pub detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}
