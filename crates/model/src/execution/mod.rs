pub mod failed_row;
pub mod load;
pub mod target;
pub mod transform;
