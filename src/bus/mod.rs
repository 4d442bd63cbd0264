//! Dispatch side of the bus: handlers, the dispatcher and the host.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BusBuilder                                │
//! │  handlers / resolver / clock / error filters / concurrency  │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ build()
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BusHost                                 │
//! │  engine stream ─▶ handler ─▶ notify_success                 │
//! │                      └─ error ─▶ ErrorPipeline               │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                    ▲
//!          ▼                                    │
//! ┌─────────────────┐                 ┌──────────────────────┐
//! │   Dispatcher    │ ── send ──────▶ │      BusEngine       │
//! │ invoke / raise  │                 │                      │
//! └─────────────────┘                 └──────────────────────┘
//! ```

mod builder;
mod context;
mod dispatcher;
mod handler;
mod host;
mod resolver;

pub use builder::BusBuilder;
pub use context::{CommandContext, EventContext};
pub use dispatcher::Dispatcher;
pub use handler::{CommandHandler, DelegateHandler, EventHandler};
pub use host::{BusHost, ConcurrencyPolicy, HostStats};
pub use resolver::{ResolveError, ResolverScope, ServiceRegistry, ServiceResolver};
