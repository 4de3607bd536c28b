pub mod billing;
pub mod fallback;
pub mod parser;
pub mod vision;
