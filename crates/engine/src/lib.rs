//! AutoQA execution and exploration engine
//!
//! Runs a queue of test specs against one continuously reused browser
//! session and produces a passed/failed/skipped record for every spec, even
//! when the page misbehaves:
//! - popups, login iframes and stray tabs are dismissed around every click
//!   and by a background monitor
//! - dropdowns and popups are explored option by option
//! - every test runs under a deadline, backed by a stuck-test watchdog
//! - elements that keep failing are circuit-broken for the rest of the run
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  TestRunner (run orchestrator)                              │
//! │    ├── Launcher -> PageDriver (one session per run)         │
//! │    ├── PopupMonitor    (background sweep every 1.5s)        │
//! │    ├── StuckDetector   (watchdog per queue index)           │
//! │    ├── pre-filter, duplicate and failure-threshold skips    │
//! │    └── ScreenshotStore (full page -> viewport -> placeholder)│
//! ├─────────────────────────────────────────────────────────────┤
//! │  ActionExecutor                                             │
//! │    ├── verify_rows | sort | input | click | authenticate    │
//! │    └── failures -> ActionResult, SessionFailure -> Err      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Explorer             │  InterstitialGuard                  │
//! │    ├── dropdowns      │    ├── login classifier             │
//! │    └── popup tabs     │    ├── popup sweep                  │
//! │                       │    └── tab / drift reconciliation   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  StabilityWaiter (fonts, images, settle, network idle)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod browser;
pub mod error;
pub mod executor;
pub mod explore;
pub mod guard;
pub mod monitor;
pub mod observer;
pub mod runner;
pub mod screenshot;
pub mod stability;
pub mod tracker;
pub mod watchdog;

pub use auth::{AuthFlow, FormLogin};
pub use browser::{ChromiumLauncher, Launcher, MockLauncher, MockPage, PageDriver};
pub use error::{EngineError, EngineResult};
pub use executor::ActionExecutor;
pub use guard::{InterstitialGuard, KeywordClassifier, LoginClassifier};
pub use observer::{ChannelObserver, ExplorationStep, RunEvent, RunObserver};
pub use runner::{prefilter_reason, TestRunner};
pub use stability::StabilityWaiter;
