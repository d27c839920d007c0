//! Conflict notification and resolution

mod notifier;
mod resolution;

pub use notifier::{ConflictNotifier, PublishOutcome};
pub use resolution::ResolutionApplier;
