//! Motion hardware abstraction.
//!
//! - [`capabilities`]: the [`MotionController`] trait and outscan callbacks
//! - [`simulated`]: a simulated sled drive for tests and dry runs

pub mod capabilities;
pub mod simulated;

pub use capabilities::{MotionController, OutscanCallbacks, OutscanFeedback, OutscanState};
pub use simulated::SimulatedMotionController;
