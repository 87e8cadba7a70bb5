pub mod clock;
pub mod error;
pub mod filter_normalizer;
pub mod logger;

pub use clock::{Clock, SystemClock};
pub use error::{AppError, Result};
pub use filter_normalizer::{
    models_key, normalize, FilterSet, ModelFilter, Predicate, TimeRange, MODELS_PREFIX,
    STATS_PREFIX, USAGE_DATA_PREFIX,
};
pub use logger::init_logger;
