pub mod row;
pub mod source;
pub mod target;
pub mod utils;

pub use source::PgSourceConnector;
pub use target::PgTargetConnector;
