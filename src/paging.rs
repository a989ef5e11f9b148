// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cursor-driven paging over IBM Cloud list APIs.
//!
//! IBM Cloud list endpoints return a `next` href whose `start` query
//! parameter is the cursor for the following page. [`page`] drives a step
//! closure from the empty cursor until the step reports it is done, the
//! listing is exhausted, or an error occurs. [`page_items`] splits the step
//! into a fetch and a synchronous visitor, which is the shape most callers
//! want.
//!
//! # Example
//!
//! ```no_run
//! use hostedcp::ibmcloud::VpcService;
//! use hostedcp::paging::page_items;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(vpc: &dyn VpcService) -> Result<(), hostedcp::errors::InfraError> {
//! let cancel = CancellationToken::new();
//! let mut names = Vec::new();
//! page_items(
//!     &cancel,
//!     |start| async move { vpc.list_vpcs(start.as_deref()).await },
//!     |vpcs| {
//!         names.extend(vpcs.into_iter().map(|v| v.name));
//!         Ok(false)
//!     },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::errors::InfraError;
use crate::ibmcloud::{CloudError, Page};

/// Query parameter carrying the paging cursor.
const START_PARAM: &str = "start";

/// Drive a paginated listing one step at a time.
///
/// `step` receives the cursor for the next page (`None` for the first page)
/// and returns whether it is done together with the page's `next` href.
///
/// # Errors
///
/// - [`InfraError::Cancelled`] when `cancel` fires
/// - [`InfraError::Parse`] when a non-empty `next` href is not a valid URL
/// - Errors returned by `step`
pub async fn page<S, Fut>(cancel: &CancellationToken, mut step: S) -> Result<(), InfraError>
where
    S: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(bool, Option<String>), InfraError>>,
{
    let mut cursor: Option<String> = None;
    loop {
        if cancel.is_cancelled() {
            return Err(InfraError::Cancelled);
        }
        let (done, next) = step(cursor.take()).await?;
        if done {
            return Ok(());
        }
        match advance(next.as_deref())? {
            Some(start) => cursor = Some(start),
            None => return Ok(()),
        }
    }
}

/// Drive a paginated listing, handing each page's items to `visit`.
///
/// `fetch` is called with the cursor for the next page (`None` for the first
/// page). `visit` receives the items of each page and returns `Ok(true)` once
/// it has seen enough. Paging stops when `visit` is done, when the page has no
/// `next` href, or when the href carries no `start` parameter.
/// Cancellation is checked before every fetch.
///
/// # Errors
///
/// - [`InfraError::Cancelled`] when `cancel` fires
/// - [`InfraError::Parse`] when a non-empty `next` href is not a valid URL
/// - Errors returned by `fetch` or `visit`
pub async fn page_items<T, F, Fut, V>(
    cancel: &CancellationToken,
    mut fetch: F,
    mut visit: V,
) -> Result<(), InfraError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, CloudError>>,
    V: FnMut(Vec<T>) -> Result<bool, InfraError>,
{
    let mut cursor: Option<String> = None;
    let mut page_count = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(InfraError::Cancelled);
        }

        page_count += 1;
        let Page { items, next } = fetch(cursor.take()).await?;
        debug!(page = page_count, items_in_page = items.len(), "Fetched page");

        if visit(items)? {
            return Ok(());
        }

        match advance(next.as_deref())? {
            Some(start) => cursor = Some(start),
            None => return Ok(()),
        }
    }
}

/// Collect every item of a paginated listing.
///
/// # Errors
///
/// Same as [`page_items`].
pub async fn collect_all<T, F, Fut>(cancel: &CancellationToken, fetch: F) -> Result<Vec<T>, InfraError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, CloudError>>,
{
    let mut all = Vec::new();
    page_items(cancel, fetch, |items| {
        all.extend(items);
        Ok(false)
    })
    .await?;
    Ok(all)
}

fn advance(next: Option<&str>) -> Result<Option<String>, InfraError> {
    match next {
        None | Some("") => Ok(None),
        Some(href) => start_cursor(href),
    }
}

/// Extract the `start` query parameter from a `next` href.
///
/// # Errors
///
/// Returns [`InfraError::Parse`] if `href` is not an absolute URL.
pub fn start_cursor(href: &str) -> Result<Option<String>, InfraError> {
    let url = Url::parse(href)
        .map_err(|e| InfraError::Parse(format!("invalid next page url {href}: {e}")))?;
    Ok(url
        .query_pairs()
        .find(|(k, _)| k == START_PARAM)
        .map(|(_, v)| v.into_owned()))
}

#[cfg(test)]
#[path = "paging_tests.rs"]
mod paging_tests;
