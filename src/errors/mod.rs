pub mod classification;
pub mod retry;
pub mod types;

pub use classification::ErrorClassification;
pub use types::GoadError;
