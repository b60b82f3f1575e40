//! AkiraOS App Platform
//!
//! Installs, persists and supervises sandboxed WebAssembly apps on a
//! resource-constrained device.
//!
//! # Architecture
//!
//! ```text
//!  shell / cloud / UI
//!         │  install, start, stop, list ...      ▲ StateChange
//!         ▼                                      │
//!  ┌──────────────────────── AppManager ─────────┴──────────┐
//!  │ SessionTable   AppRegistry   RestartSchedule  Observers│
//!  │      │              │ persist                          │
//!  └──────┼──────────────┼──────────────┬───────────────────┘
//!         ▼              ▼              ▼
//!     manifest      BlobStore     SandboxBridge ──> Engine
//!     (parser)    (akira-storage)  (akira-runtime)
//! ```
//!
//! - `manager`: [`AppManager`], the one service object callers talk to
//! - `registry`: installed-app table, the single source of truth
//! - `persist`: fixed-record registry blob
//! - `install`: chunked install sessions
//! - `manifest`: manifest documents to limits, capabilities, restart policy
//! - `lifecycle`: states, crash policy, per-app restart schedule
//! - `events`: state-change observers
//! - `clock`: time source for restart deadlines
//! - `process`: scheduler-facing process entry

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod install;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod persist;
pub mod process;
pub mod registry;

pub use clock::{Clock, ManualClock};
pub use config::PlatformConfig;
pub use error::AppError;
pub use events::{ObserverId, StateChange};
pub use install::SessionId;
pub use lifecycle::{AppState, RestartPolicy};
pub use manager::AppManager;
pub use manifest::AppManifest;
pub use process::ProcessEntry;
pub use registry::{AppId, AppInfo, AppSource};
