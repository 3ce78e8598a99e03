//! Cursor-following pagination over JSON:API list responses.
//!
//! Follows `links.next` until absent, either aggregating every item in page
//! order or emitting page-by-page without buffering. A consecutively
//! repeated `next` URL is a server-side loop and fails the traversal.

use crate::constants;
use crate::error::Error;
use std::future::Future;

/// Anything that looks like one page of a list response.
pub trait Page {
    type Item;

    /// The absolute `links.next` URL, or `None` on the last page.
    fn next_url(&self) -> Option<String>;

    /// Consume the page, yielding its items in response order.
    fn into_items(self) -> Vec<Self::Item>;
}

/// Clamp a caller-provided page size to the API maximum.
#[must_use]
pub fn clamp_limit(requested: u32) -> u32 {
    requested.clamp(1, constants::MAX_PAGE_LIMIT)
}

/// Follow `links.next` from `first`, aggregating all items in page order.
///
/// # Errors
///
/// Fails with `RepeatedPaginationUrl` when the same `next` URL repeats
/// consecutively, or with whatever `fetch_next` returns.
pub async fn paginate_all<P, F, Fut>(first: P, mut fetch_next: F) -> Result<Vec<P::Item>, Error>
where
    P: Page,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<P, Error>>,
{
    let mut items = Vec::new();
    let mut page = first;
    let mut previous_next: Option<String> = None;

    loop {
        let next = page.next_url();
        items.extend(page.into_items());

        let Some(url) = next else { break };
        if previous_next.as_deref() == Some(url.as_str()) {
            return Err(Error::RepeatedPaginationUrl { url });
        }
        previous_next = Some(url.clone());
        page = fetch_next(url).await?;
    }

    Ok(items)
}

/// Follow `links.next` from `first`, handing each page to `emit` exactly
/// once. Never holds more than one page.
///
/// # Errors
///
/// Same failure modes as [`paginate_all`], plus whatever `emit` returns.
pub async fn paginate_stream<P, F, Fut, E>(
    first: P,
    mut fetch_next: F,
    mut emit: E,
) -> Result<(), Error>
where
    P: Page,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<P, Error>>,
    E: FnMut(&P) -> Result<(), Error>,
{
    let mut page = first;
    let mut previous_next: Option<String> = None;

    loop {
        emit(&page)?;

        let Some(url) = page.next_url() else {
            return Ok(());
        };
        if previous_next.as_deref() == Some(url.as_str()) {
            return Err(Error::RepeatedPaginationUrl { url });
        }
        previous_next = Some(url.clone());
        page = fetch_next(url).await?;
    }
}
