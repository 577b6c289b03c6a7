//! View Controller: UI state, typed actions, statistics, rendering, and the
//! controller tying them to the session and the record store.

pub mod action;
pub mod controller;
pub mod render;
pub mod state;
pub mod stats;

pub use action::{Action, Dataset, ExportFormat, FormKind};
pub use controller::{Download, RootSlot, Surface, ViewController};
pub use render::{Frame, Renderer};
pub use state::{DashboardView, ManagerTab, Phase, TestFilter, UiState, UserTab};
pub use stats::{Clock, FixedClock, StatsPanel, SystemClock, Targets};
