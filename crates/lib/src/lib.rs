//! fnpack-lib: discovery, build, packaging and idempotency for function deployments.
//!
//! A source tree laid out as `<root>/<module>/<function>.<ext>` is turned into
//! one deployable archive per function:
//! - [`discover`]: find the function inventory from the file layout
//! - [`build`]: compile every function (batch or per-function strategy)
//! - [`package`]: archive each compiled bundle into `<function>.zip`
//! - [`cache`]: replay a successful build across repeated runs
//! - [`pipeline`]: run the steps above end to end
//!
//! The resulting artifact manifest is handed to a [`provision::Provisioner`].

pub mod build;
pub mod cache;
pub mod consts;
pub mod context;
pub mod discover;
pub mod package;
pub mod pipeline;
pub mod provision;
pub mod template;
pub mod tool;
pub mod util;
