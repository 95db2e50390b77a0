//! Wire protocol
//!
//! This module provides:
//! - Action tags and feed categories
//! - Response envelope and per-action payload records
//! - Request variants
//! - The JSON envelope codec

pub mod action;
pub mod category;
pub mod codec;
pub mod constants;
pub mod request;
pub mod response;

pub use action::Action;
pub use category::Category;
pub use codec::{decode, encode};
pub use request::{Request, RequestPayload};
pub use response::{Response, ResponsePayload};
