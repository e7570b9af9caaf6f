//! Passwordless, device-bound authentication core.
//!
//! A mobile number is bound to one device and push address at a time.
//! Registration opens a one-time challenge; answering it activates that device
//! and deactivates any sibling row for the number. Relying sites then ask the
//! active device to approve a login over push, and the answer lands in the
//! trust ledger.
//!
//! `AuthService` composes the parts and is what the HTTP layer calls. The
//! storage and push seams are traits so the core runs against memory stores
//! and fake providers in tests.

mod activation;
mod challenge;
pub mod clock;
pub mod code;
mod error;
pub mod identity;
mod ledger;
mod models;
pub mod policy;
pub mod push;
mod service;
pub mod store;

pub use activation::{ActivationAuthority, MobileGuard};
pub use challenge::ChallengeManager;
pub use error::{AuthError, BoxError};
pub use ledger::TrustLedger;
pub use models::{Identity, IdentityState, Registration, RegistrationOutcome, TrustRecord};
pub use policy::AuthPolicy;
pub use service::AuthService;
