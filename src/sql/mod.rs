pub mod engine;
pub mod parser;
pub mod plan;
pub mod schema;
pub mod types;
