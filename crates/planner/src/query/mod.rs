pub mod chunk;
pub mod dialect;
pub mod renderer;
pub mod source;
pub mod statement;
