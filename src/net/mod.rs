//! Remote collaborators: the page-facing network and the sync backend.

mod backend;
mod fetch;

pub use backend::{Backend, RestBackend};
pub use fetch::{HttpNetwork, Network};
