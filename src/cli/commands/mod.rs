//! Leaf command implementations.

pub mod apps;
pub mod auth;
pub mod workflow;

use crate::credentials::{Overrides, Resolver};
use crate::error::Error;
use crate::transport::Client;

/// Build an authenticated client from the resolved credential set.
///
/// # Errors
///
/// Fails with the credential-resolution errors of [`Resolver::resolve`].
pub fn authenticated_client(overrides: &Overrides) -> Result<Client, Error> {
    let resolver = Resolver::open_default()?;
    let (credentials, source) = resolver.resolve(overrides)?;
    tracing::debug!("credentials resolved from {source}");
    Client::from_credentials(credentials)
}
