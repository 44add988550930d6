pub mod classifiers;
pub mod notifiers;
pub mod sources;
pub mod traits;

pub use traits::{ListingSource, Notification, Notifier, RelevanceClassifier};
