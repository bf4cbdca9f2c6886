//! Project-scoped code intelligence: context cache, position codec and the
//! symbol edit service.

pub mod context;
pub mod position;
pub mod project_config;
pub mod references;
pub mod rename;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use context::ProjectContextCache;
pub use references::SymbolEditService;
