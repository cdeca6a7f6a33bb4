pub mod as_mode;
pub mod driver;
pub mod non_as;
pub mod state;

pub use as_mode::AsModeController;
pub use driver::Driver;
pub use non_as::ControlModeController;
pub use state::{ProjectOutcome, ProjectStatus, RunSummary};
