pub mod api;
pub mod budget;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod invalidation;
pub mod metrics_defs;
pub mod purgers;
pub mod request;
pub mod transport;

#[cfg(test)]
mod testutils;

pub use config::PurgerSettings;
pub use dispatcher::Dispatcher;
pub use errors::{BuildError, DispatchError, ValidationError};
pub use invalidation::{Invalidation, InvalidationTypes, RequestOutcome};
pub use purgers::Purgers;
