//! pilot-core - browser remote-control operations
//!
//! Everything between the debugging-protocol runtime and the RPC surface:
//! session and tab management, coordinate resolution, pointer trajectory
//! synthesis and execution, timed waits, scroll convergence, typing, and
//! heap snapshot capture and search.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ pilot-server │  RPC surface
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐
//! │  pilot-core  │  This crate
//! │  ┌─────────┐ │
//! │  │ Browser │ │  Operation facade + cursor state
//! │  └─────────┘ │
//! │  ┌─────────┐ │
//! │  │ Session │ │  Active tab + navigation tracking
//! │  └─────────┘ │
//! │  coords  wait │
//! │  cursor  heap │
//! │  motion scroll│
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐
//! │pilot-runtime │  Transport + correlation
//! └──────────────┘
//! ```

pub mod browser;
pub mod coords;
pub mod cursor;
pub mod error;
pub mod heap;
pub mod motion;
pub mod scripts;
pub mod scroll;
pub mod session;
pub mod wait;

pub use browser::{Browser, TabInfo, TextItem};
pub use coords::{CoordsQuery, CoordsResult, Rect};
pub use cursor::{MoveRequest, Point, SpeedProfile};
pub use error::{Error, Result};
pub use motion::{MotionDriver, MouseButton};
pub use session::{DebugSession, Session};

pub use pilot_runtime::ClientOptions;
