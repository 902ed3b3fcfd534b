// Contract module defining all collaborator interfaces
pub mod enforcer;
pub mod repositories;
pub mod token;

// Re-export interface contracts
pub use enforcer::*;
pub use repositories::*;
pub use token::*;
