//! # Nudge Core Library
//!
//! Local-first reminder scheduling and sync. The library decides when each
//! reminder's alert should fire, keeps those alerts inside the platform's
//! pending-alert budget, and reconciles the device's reminders with a remote
//! store under whole-record last-write-wins.
//!
//! ## Architecture
//!
//! - **Recurrence**: calendar arithmetic for the hourly, daily, weekly and
//!   monthly rules
//! - **Alerts**: a budget allocator that fits upcoming occurrences into a
//!   fixed number of platform slots, and a scheduler that issues them
//! - **Sync**: a reconciler that merges remote and local records, pushes
//!   local-only records and deletes, and persists the result atomically
//! - **Auth**: a single-flight token refresh gate in front of every remote call
//! - **Storage**: SQLite-backed local store and TOML configuration
//!
//! ## Key Components
//!
//! - [`ReminderService`]: user-facing mutations wired to store and alerts
//! - [`RecurrenceEngine`]: next-occurrence computation
//! - [`AlertBudgetAllocator`] / [`AlertScheduler`]: alert planning and issuance
//! - [`SyncReconciler`]: one sync pass
//! - [`TokenRefreshGate`]: authorized requests with coalesced refresh
//!
//! Collaborators (platform alerts, remote store, credential storage, token
//! refresh, clock) are traits injected at construction. The library installs
//! no tracing subscriber.

pub mod alerts;
pub mod auth;
pub mod clock;
pub mod error;
pub mod model;
pub mod recurrence;
pub mod service;
pub mod storage;
pub mod sync;

pub use alerts::{
    AlertAction, AlertBudgetAllocator, AlertCenter, AlertPayload, AlertScheduler, Completion,
    MemoryAlertCenter, RescheduleReport,
};
pub use auth::{
    CredentialStore, KeyringCredentialStore, MemoryCredentialStore, OAuthRefresher,
    TokenRefreshGate, TokenRefresher,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{AuthError, ConfigError, CoreError, StoreError, ValidationError};
pub use model::{NewReminder, RecurrenceRule, Reminder, ReminderPatch, Tag};
pub use recurrence::{Advancement, CalendarZone, RecurrenceEngine};
pub use service::ReminderService;
pub use storage::{Config, LocalStore};
pub use sync::{
    HttpRemoteStore, MemoryRemoteStore, RemoteStore, SyncOutcome, SyncReconciler, SyncReport,
    SyncStatus,
};
