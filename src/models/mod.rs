pub mod deal;
pub mod user;

pub use deal::*;
pub use user::*;
