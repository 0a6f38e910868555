//! # pxp-id
//!
//! VM id and resource locator types for the pxp provider.
//!
//! ## Design Principles
//!
//! - VM ids are handed out by the hypervisor; this crate only carries them
//! - A locator is the durable handle persisted for a provisioned resource
//! - Locators have one canonical string form with strict parsing
//! - Decoding never returns a partially populated locator
//!
//! ## Locator Format
//!
//! `{node}/{kind}/{id}`
//!
//! Examples:
//! - `pve1/qemu/100`
//! - `rack-b-07/qemu/4213`

mod error;
mod types;

pub use error::LocatorError;
pub use types::*;
