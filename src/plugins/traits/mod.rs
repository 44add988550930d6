pub mod classifier;
pub mod notifier;
pub mod source;

pub use classifier::RelevanceClassifier;
pub use notifier::{Notification, Notifier};
pub use source::ListingSource;
