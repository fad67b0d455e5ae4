pub mod checkpoint;
pub mod cursor;
