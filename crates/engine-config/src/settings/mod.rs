pub mod error;
pub mod parallel;
pub mod validated;
pub mod validator;

pub use error::SettingsError;
pub use parallel::ParallelSettings;
pub use validated::ValidatedSettings;
pub use validator::SettingsValidator;
