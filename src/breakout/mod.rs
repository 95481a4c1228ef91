pub mod detector;
pub mod machine;
pub mod session;

pub use detector::{merge_signals, BreakoutDetector};
pub use machine::{check_exit, pending_from_state, step, MachineState};
pub use session::{session_ranges, SessionSpec};
