//! Single-assignment results with ordered continuation chains.
//!
//! - [`Deferred`]: fires once with a success or failure value, then feeds it
//!   through `(on_success, on_failure)` pairs in the order they were attached
//! - [`DeferredGroup`]: fires once every member has fired, with the member
//!   outcomes in submission order

pub mod chain;
pub mod group;

pub use chain::Deferred;
pub use group::DeferredGroup;
