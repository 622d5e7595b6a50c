pub mod filesystem;
pub mod workspace;

pub use workspace::WorkspaceAllocator;
