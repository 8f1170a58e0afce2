//! Git subsystem: the subprocess CLI wrapper, the scoped branch guard, and
//! the rename move registry.

pub mod guard;
pub mod moves;
pub mod repo;

pub use guard::BranchGuard;
pub use moves::MoveRegistry;
pub use repo::GitRepo;
