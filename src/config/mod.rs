//! Configuration for a jobrepo repository.
//!
//! The config lives at `<root>/config.yaml` and is shared by all sessions
//! attached to the repository. Unknown fields are ignored for forward
//! compatibility.

mod model;
mod operations;
mod types;

#[cfg(test)]
mod tests;

pub use model::Config;
