//! Payment handlers and supporting modules.
//!
//! A purchase is one `payment_transactions` row keyed by a globally unique
//! reference. It starts `pending`, and moves to `completed` or `failed`
//! exactly once — both transitions are guarded updates, so the two
//! reconciliation paths (the user returning through `verify` and the
//! gateway's signed webhook) can race without a double transition. The
//! enrollment insert is idempotent under the (user, course) unique
//! constraint, which is what lets the webhook swallow internal errors and
//! always acknowledge.
//!
//! A transaction abandoned mid-checkout stays `pending` forever; nothing
//! retries it. The webhook or a late re-verify can still settle it, but an
//! unpaid abandoned checkout is simply a dead row.

pub(crate) mod initialize;
mod gateway;
mod state;
mod storage;
pub(crate) mod types;
pub(crate) mod verify;
pub(crate) mod webhook;

pub use state::{PaymentsConfig, PaymentsState};
