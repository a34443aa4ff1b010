pub mod calibrated;
pub mod traits;
pub mod types;

pub use calibrated::CalibratedExecutor;
pub use traits::{ActionDispatcher, Reflector};
pub use types::{DispatchedTap, ReflectorVerdict, TapReport, TapRequest};
