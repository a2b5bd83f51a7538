//! Signed access tokens gating every task operation.

pub mod token;

pub use token::{AccessToken, TokenService};
