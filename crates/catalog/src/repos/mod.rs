//! Repository traits for catalog operations.

pub mod links;
pub mod media;
pub mod servers;

pub use links::LinkRepo;
pub use media::MediaRepo;
pub use servers::ServerRepo;
