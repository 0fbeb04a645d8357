pub mod jwt;
pub mod middleware;

pub use jwt::*;
pub use middleware::*;
