//! Git smart HTTP gateway and repository lifecycle management.
//!
//! The gateway translates the two smart HTTP endpoints into `git upload-pack` /
//! `git receive-pack` invocations and streams their output back with pkt-line
//! framing. The lifecycle half creates, clones, inspects and deletes the bare and
//! working-copy repositories behind it.

pub mod errors;
pub mod executor;
pub mod gateway;
pub mod pkt;
pub mod process;
pub mod repo;
pub mod service;
pub mod state;
pub mod validation;

pub use errors::{EmptyRepositoryError, GitHttpError, RepositoryError};
pub use executor::{GitExecutor, ServiceMode, TransportExecutor};
pub use gateway::router;
pub use process::{DebugFlags, ServiceProcess};
pub use repo::{File, HostedRepository, RepositorySettings, WorkingCopy};
pub use service::Service;
pub use state::GitHttpState;
