//! IVR executor, concurrent call manager, campaign scheduler, and the
//! engine composition root (components C8-C12 plus the composition root
//! that wires them to `dialer-dialog-core`/`dialer-rtp-core`/
//! `dialer-media-core`).
//!
//! [`engine::Engine`] is the single entry point: it owns the SIP
//! transport, the registrar, the [`call_manager::ConcurrentCallManager`],
//! and the [`scheduler::CampaignScheduler`], and drives them against
//! whatever [`repository::Repository`] the caller supplies.

pub mod audio;
pub mod call_manager;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod ivr;
pub mod model;
pub mod repository;
pub mod scheduler;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use event_bus::{Event, EventBus, Topic};
pub use repository::Repository;
