//! Alt session management module
//!
//! This module provides the session lifecycle core: the registry that owns
//! every live alt, the macro and reconnect timers, the observer event
//! broadcaster, the control surface, and the loop that drives them.

pub mod broadcaster;
pub mod control_surface;
pub mod handle;
pub mod macro_scheduler;
pub mod reconnect_supervisor;
pub mod registry;
pub mod session_manager;

pub use broadcaster::{EventBroadcaster, ObserverEvent};
pub use control_surface::{ControlCommand, ControlError, ControlSurface, Outcome};
pub use handle::{BehaviorFlags, SessionError, SessionHandle, SessionState};
pub use macro_scheduler::{MacroError, MacroInfo, MacroScheduler};
pub use reconnect_supervisor::{AUTO_RECONNECT_DELAY, ReconnectSupervisor, SETTLE_DELAY};
pub use registry::{SessionRegistry, TimerFired, ToggleAction};
pub use session_manager::{ManagerState, SessionManager, SessionStats};
