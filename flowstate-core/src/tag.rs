//! Shape tags for states and events.
//!
//! Transitions are matched on the *shape* of a value rather than on the
//! value itself. Each state and event type names its shapes with an explicit
//! tag, usually a fieldless enum mirroring the variants of the value:
//!
//! ```rust
//! use flowstate_core::{MachineState, Tagged};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum Screen {
//!     Idle,
//!     Loaded(Vec<String>),
//!     Failed(String),
//! }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum ScreenTag {
//!     Idle,
//!     Loaded,
//!     Failed,
//! }
//!
//! impl Tagged for Screen {
//!     type Tag = ScreenTag;
//!
//!     fn tag(&self) -> ScreenTag {
//!         match self {
//!             Screen::Idle => ScreenTag::Idle,
//!             Screen::Loaded(_) => ScreenTag::Loaded,
//!             Screen::Failed(_) => ScreenTag::Failed,
//!         }
//!     }
//! }
//!
//! impl MachineState for Screen {
//!     fn is_error(&self) -> bool {
//!         matches!(self, Screen::Failed(_))
//!     }
//! }
//!
//! assert_eq!(Screen::Loaded(vec![]).tag(), ScreenTag::Loaded);
//! assert!(Screen::Failed("offline".into()).is_error());
//! ```

use std::fmt::Debug;
use std::hash::Hash;

/// Bounds required of a tag value.
pub trait Tag: Debug + Clone + Eq + Hash + Send + Sync + 'static {}

impl<T> Tag for T where T: Debug + Clone + Eq + Hash + Send + Sync + 'static {}

/// A value with a discoverable shape used for registry lookup.
pub trait Tagged {
    type Tag: Tag;

    /// Returns the shape of this value.
    fn tag(&self) -> Self::Tag;
}

/// A state the machine can hold.
pub trait MachineState: Tagged + Debug + Clone + Send + Sync + 'static {
    /// Returns true if this state represents a failure that `retry` may
    /// recover from.
    fn is_error(&self) -> bool {
        false
    }
}

/// Bounds required of an event.
pub trait MachineEvent: Tagged + Debug + Send + 'static {}

impl<T> MachineEvent for T where T: Tagged + Debug + Send + 'static {}

/// Bounds required of a side effect.
pub trait SideEffect: Debug + Clone + Send + 'static {}

impl<T> SideEffect for T where T: Debug + Clone + Send + 'static {}

/// Side-effect type for machines that never emit side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSideEffect {}
