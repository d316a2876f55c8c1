//! Rate limiting rules, state and admission logic.

mod backend;
mod clock;
mod engine;
mod key;
mod rule;
mod rules;
mod service;
mod store;
mod sweeper;
mod window;

pub use backend::LimitsBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Decision, EngineConfig, RateLimitEngine};
pub use key::WindowKey;
pub use rule::{Algorithm, RateLimitFilter, RateLimitRule};
pub use rules::RulesFile;
pub use service::{CheckOutcome, LimitsService};
pub use store::{InMemoryRuleStore, RuleStore};
pub use sweeper::spawn_sweeper;
pub use window::{parse_window, WindowParseError};
