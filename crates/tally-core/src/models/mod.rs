//! Data models for Tally

mod collection;
mod conflict;
mod finance;
mod record;
mod settings;
mod snapshot;

pub use collection::CollectionKey;
pub use conflict::{Conflict, ConflictEvent, ConflictReason, ResolutionChoice, SettledResolution};
pub use finance::{validate_payload, Account, AccountKind, Goal, Investment, Payload, Transaction};
pub use record::{Record, RecordId};
pub use settings::{Settings, ThemeMode};
pub use snapshot::CollectionSnapshot;
