pub mod dedupe;
pub mod merge;
pub mod sanitize;
pub mod session;
pub mod typewriter;

pub use dedupe::dedupe;
pub use merge::merge_overlap;
pub use sanitize::filter_sentinels;
pub use session::StreamSession;
pub use typewriter::{TargetUpdate, Typewriter};
