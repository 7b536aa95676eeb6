//! Jail: the restriction registry, its release timers, crash recovery and vote gate
//!
//! A member is jailed by swapping their roles for the jail role plus any roles the
//! guild asked to keep. The roles they had before are remembered and handed back on
//! release, either on request or when a timed sentence runs out.

mod error;
mod persistence;
mod record;
mod registry;
mod timer;
mod vote;

pub use error::{JailError, JailResult, RecoveryError};
pub use persistence::{RebuildReport, resolve};
pub use record::{
    ReplyTarget, RestrictionKey, RestrictionRecord, RestrictionSnapshot, SerializedRestriction,
};
pub use registry::{ArrestOutcome, JailRegistry, Lifecycle, ReleaseOutcome};
pub use timer::ReleaseTimer;
pub use vote::{APPROVE, REJECT, VoteGate, VoteOutcome};
