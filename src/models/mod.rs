pub mod change;
pub mod scan_record;
pub mod target;

pub use change::{FunctionChangeRecord, Phase};
pub use scan_record::{ScanRecord, ScanStatus, Scanner};
pub use target::{
    bare_function_name, canonical_function_name, parse_prompt_file, Project, PromptLine, Target,
};
