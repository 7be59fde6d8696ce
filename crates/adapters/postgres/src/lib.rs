//! tessera-adapter-postgres - PostgreSQL 适配器

mod connection;
mod index;
mod seed;

pub use connection::*;
pub use index::*;
pub use seed::*;
