mod definition;
mod loader;
mod matcher;
mod operator;
mod state;

pub use definition::{
    AlarmDefinition, AlarmSpec, ConfigurationError, MAX_AGGREGATE_PERIOD_SECS, MatchValue,
};
pub use loader::{LoadError, load_definitions, parse_definitions};
pub use matcher::matches;
pub use operator::{ComparisonOperator, Statistic};
pub use state::{AlarmState, WindowPolicy, evaluate_window};
