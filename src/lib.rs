//! # ddev
//!
//! Local web development environments built from containers. A project
//! directory with a `.ddev/config.yaml` gets a web server, a database, a mail
//! catcher and any add-on services, reachable under a stable hostname through
//! a shared TLS-terminating router.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ddev::{Context, Lifecycle, Project};
//!
//! # async fn example() -> Result<(), ddev::Error> {
//! let ctx = Context::from_env()?;
//! let project = Project::load(std::path::Path::new("/home/me/mysite"))?;
//!
//! let lifecycle = Lifecycle::new(&ctx);
//! lifecycle.start(&project).await?;
//! println!("{}", lifecycle.status(&project).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Every invocation is a short-lived process. Shared state lives on disk:
//! - the global config is rewritten under an advisory file lock
//! - router registration is serialized by `router.lock`
//! - two starts of the same project are serialized by `.ddev/start.lock`
//!
//! Long-running operations take the [`Context`]'s cancellation token and
//! terminate their child processes when it fires.

pub mod compose;
pub mod context;
pub mod docker;
pub mod error;
pub mod global;
pub mod host;
pub mod lifecycle;
pub mod lock;
pub mod markers;
pub mod port;
pub mod project;
pub mod router;
pub mod shell;
pub mod ssh_agent;
pub mod volume;

// Re-export commonly used types
pub use context::Context;
pub use docker::{ContainerEngine, DockerClient, DockerError};
pub use error::{Error, Result};
pub use global::{GlobalConfig, GlobalState};
pub use host::HostProfile;
pub use lifecycle::{Lifecycle, ProjectState};
pub use project::{Project, ProjectConfig};
pub use volume::VolumeXfer;
