// Application layer - use cases and orchestration.
// Clients (CLI, HTTP) go through these services, never the repository.

pub mod error;
mod locks;
mod records;
mod service;

pub use error::*;
pub use locks::*;
pub use records::*;
pub use service::*;
