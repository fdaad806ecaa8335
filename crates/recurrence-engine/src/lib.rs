//! # recurrence-engine
//!
//! Lazy RFC 5545 recurrence expansion for calendar components.
//!
//! A recurring component is a start value, an optional RRULE, RDATE additions
//! and EXDATE exclusions. The engine expands that into an ascending, possibly
//! unbounded stream of occurrences, remembers sampled reentry points so that a
//! moving display window can be re-queried cheaply, and restructures series
//! when a user edits one occurrence or everything from an occurrence on.
//!
//! ## Modules
//!
//! - [`temporal`] — DATE / floating DATE-TIME / zoned DATE-TIME values
//! - [`rule`] — RRULE parts, builder and text form
//! - [`expander`] — rule → lazy occurrence stream
//! - [`recurrence_set`] — rule + additions − exclusions, cached queries
//! - [`cache`] — windowed reentry cache
//! - [`series`] — editable components, instances, UID generation
//! - [`edit`] — split, collapse and delete operations
//! - [`error`] — Error types

pub mod cache;
pub mod edit;
pub mod error;
pub mod expander;
pub mod recurrence_set;
pub mod rule;
pub mod series;
pub mod temporal;

pub use cache::{CacheConfig, ReentryPoint, WindowCache};
pub use error::RecurrenceError;
pub use expander::{expand_rrule, RuleIter};
pub use recurrence_set::{Occurrences, RecurrenceSet};
pub use rule::{ByWeekday, Frequency, RecurrenceRule, RecurrenceRuleBuilder, Termination};
pub use series::{Instance, Series, SeriesState, SessionUidGenerator, UidGenerator};
pub use temporal::{Temporal, TemporalKind};
