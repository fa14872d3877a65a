//! # edupay-providers
//!
//! One gateway per external payment provider, each implementing the
//! [`edupay_core::ProviderGateway`] capability surface and hiding its
//! own wire format:
//!
//! - **Payme** — JSON-RPC 2.0 merchant API. Authenticates with a
//!   shared-secret `Authorization: Basic` header; expects its own
//!   error envelope (`{error:{code,message}}`) even on auth failure.
//! - **Click** — flat-field signed callbacks with a two-phase
//!   Prepare/Complete protocol; answers with numeric result codes in
//!   the body, never with HTTP status codes.
//!
//! Gateways never mutate business state. They decode, verify, and
//! delegate every transition to the core settlement service, so both
//! providers exercise identical ledger logic.

pub mod click;
pub mod payme;
mod sign;

pub use click::{ClickCallback, ClickConfig, ClickProvider, ClickResponse};
pub use payme::{PaymeConfig, PaymeProvider, PaymeRpcRequest};
