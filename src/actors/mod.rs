//! Actor-based scheduling of the pipeline
//!
//! Each recurring job runs as an independent tokio task that owns its
//! ticker and listens on an mpsc command channel.
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  urbanpulse bin  │
//!                 └────────┬─────────┘
//!                          │ Scheduler::start
//!             ┌────────────┴─────────────┐
//!             │                          │
//!    ┌────────▼─────────┐      ┌─────────▼─────────┐
//!    │  CollectorActor  │      │  AggregatorActor  │
//!    │  every ~410s     │      │  every 2h         │
//!    └────────┬─────────┘      └─────────┬─────────┘
//!             │ insert samples           │ upsert summaries
//!             └────────────┬─────────────┘
//!                   ┌──────▼──────┐
//!                   │   Storage   │
//!                   └─────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **CollectorActor**: one collection cycle per tick
//! - **AggregatorActor**: one aggregation cycle per tick, plus retention
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc channel for manual triggers and shutdown
//! 2. **Request/Response**: oneshot channels carry the cycle report back
//!
//! A failing or panicking cycle is logged and the actor keeps its schedule.
//! The two actors never wait on each other.

pub mod aggregator;
pub mod collector;
pub mod messages;
pub mod scheduler;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

/// Await `fut`, turning a panic into an error
pub(crate) async fn guarded<F: Future>(job: &str, fut: F) -> anyhow::Result<F::Output> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| anyhow::anyhow!("{job} panicked: {}", panic_message(&*panic)))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
