pub mod config;
pub mod equivalence;
pub mod error;
pub mod feed_scan;
pub mod index;
pub mod models;
pub mod normalize;
pub mod resolver;
pub mod source;
pub mod stats;

pub use equivalence::are_equivalent;
pub use error::{MatchError, ResolveError};
pub use models::{TitleEntry, TitleType};
pub use normalize::normalize;
pub use resolver::TitleResolver;
pub use source::TitleSource;
