use std::collections::VecDeque;

use anyhow::{Result, bail};

use crate::client::{ContentApi, SEARCH_PAGE_LIMIT};
use crate::page::{ContentItem, SearchPage};
use crate::resolve::resolve_query;

/// Lazy sequence of content items for a query.
///
/// Fetches one remote page at a time and yields its items in remote order.
/// Nothing is requested until the first item is pulled, and dropping the
/// iterator stops all further requests. The sequence ends when the caller's
/// limit is exhausted or the remote reports a short page; a transport error
/// is yielded once and ends it as well. Each value is a fresh iteration —
/// there is no rewind.
pub struct PageQuery<'a, A: ContentApi + ?Sized> {
    api: &'a A,
    query: String,
    expand: Vec<String>,
    start: usize,
    remaining: Option<usize>,
    buffer: VecDeque<ContentItem>,
    exhausted: bool,
}

impl<'a, A: ContentApi + ?Sized> PageQuery<'a, A> {
    pub fn new(
        api: &'a A,
        query: impl Into<String>,
        expand: &[&str],
        start: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            api,
            query: query.into(),
            expand: expand.iter().map(ToString::to_string).collect(),
            start,
            remaining: limit,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_next_page(&mut self) -> Result<SearchPage> {
        let expand = self
            .expand
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>();
        let page = self
            .api
            .search_by_query(&self.query, &expand, self.start, SEARCH_PAGE_LIMIT)?;
        self.start += SEARCH_PAGE_LIMIT;
        Ok(page)
    }
}

impl<A: ContentApi + ?Sized> Iterator for PageQuery<'_, A> {
    type Item = Result<ContentItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            if let Some(item) = self.buffer.pop_front() {
                self.remaining = self.remaining.map(|count| count - 1);
                return Some(Ok(item));
            }
            if self.exhausted {
                return None;
            }
            let page = match self.fetch_next_page() {
                Ok(page) => page,
                Err(error) => {
                    self.exhausted = true;
                    self.remaining = Some(0);
                    return Some(Err(error));
                }
            };
            // A page smaller than requested is the last one. An empty page
            // also ends the sequence even if the remote claims otherwise.
            if page.size < page.limit || page.results.is_empty() {
                self.exhausted = true;
            }
            if page.results.is_empty() {
                return None;
            }
            self.buffer.extend(page.results);
        }
    }
}

/// Resolve a reference and return a lazy item sequence for it.
pub fn iterate_pages<'a, A: ContentApi + ?Sized>(
    api: &'a A,
    reference: &str,
    expand: &[&str],
    start: usize,
    limit: Option<usize>,
) -> PageQuery<'a, A> {
    PageQuery::new(api, resolve_query(reference), expand, start, limit)
}

/// Resolve a reference and fetch a single result page (no iteration).
pub fn find_pages<A: ContentApi + ?Sized>(
    api: &A,
    reference: &str,
    expand: &[&str],
    start: usize,
    limit: usize,
) -> Result<SearchPage> {
    api.search_by_query(&resolve_query(reference), expand, start, limit)
}

/// Resolve a reference that must name exactly one page.
pub fn find_exactly_one<A: ContentApi + ?Sized>(
    api: &A,
    reference: &str,
    expand: &[&str],
) -> Result<ContentItem> {
    let mut page = find_pages(api, reference, expand, 0, 2)?;
    match page.results.len() {
        1 => Ok(page.results.remove(0)),
        0 => bail!("no page matches {reference}"),
        _ => bail!("ambiguous search: {reference}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{SEARCH_PAGE_LIMIT, find_exactly_one, iterate_pages};
    use crate::test_api::{MockApi, item};

    fn canned(count: usize) -> MockApi {
        let results = (0..count)
            .map(|index| {
                item(
                    &format!("{}", 100 + index),
                    &format!("Page {index}"),
                    "DOC",
                    1,
                    "<p>body</p>",
                )
            })
            .collect();
        MockApi::with_canned_results(results)
    }

    fn titles(api: &MockApi, limit: Option<usize>) -> Vec<String> {
        iterate_pages(api, "type = page", &[], 0, limit)
            .map(|result| result.expect("item").title)
            .collect()
    }

    #[test]
    fn yields_all_items_across_pages_without_limit() {
        let api = canned(SEARCH_PAGE_LIMIT + 5);
        let titles = titles(&api, None);
        assert_eq!(titles.len(), SEARCH_PAGE_LIMIT + 5);
        assert_eq!(titles[0], "Page 0");
        assert_eq!(titles[SEARCH_PAGE_LIMIT + 4], "Page 29");
        // Second page is short, so exactly two requests.
        assert_eq!(api.search_calls.borrow().len(), 2);
    }

    #[test]
    fn short_first_page_terminates_after_one_request() {
        let api = canned(3);
        assert_eq!(titles(&api, None).len(), 3);
        assert_eq!(api.search_calls.borrow().len(), 1);
    }

    #[test]
    fn full_last_page_costs_one_extra_request() {
        let api = canned(SEARCH_PAGE_LIMIT);
        assert_eq!(titles(&api, None).len(), SEARCH_PAGE_LIMIT);
        assert_eq!(api.search_calls.borrow().len(), 2);
    }

    #[test]
    fn limit_stops_mid_page_without_extra_requests() {
        let api = canned(100);
        assert_eq!(titles(&api, Some(30)).len(), 30);
        assert_eq!(api.search_calls.borrow().len(), 2);
    }

    #[test]
    fn limit_equal_to_page_size_does_not_fetch_the_next_page() {
        let api = canned(100);
        assert_eq!(titles(&api, Some(SEARCH_PAGE_LIMIT)).len(), SEARCH_PAGE_LIMIT);
        assert_eq!(api.search_calls.borrow().len(), 1);
    }

    #[test]
    fn limit_larger_than_total_yields_total() {
        let api = canned(4);
        assert_eq!(titles(&api, Some(10)).len(), 4);
    }

    #[test]
    fn zero_limit_yields_nothing_and_issues_no_request() {
        let api = canned(100);
        assert!(titles(&api, Some(0)).is_empty());
        assert_eq!(api.search_calls.borrow().len(), 0);
    }

    #[test]
    fn nothing_is_fetched_until_first_pull() {
        let api = canned(100);
        let iter = iterate_pages(&api, "type = page", &[], 0, None);
        assert_eq!(api.search_calls.borrow().len(), 0);
        drop(iter);
        assert_eq!(api.search_calls.borrow().len(), 0);
    }

    #[test]
    fn start_offset_is_passed_through() {
        let api = canned(100);
        let first = iterate_pages(&api, "type = page", &[], 50, None)
            .next()
            .expect("item")
            .expect("ok");
        assert_eq!(first.title, "Page 50");
        assert_eq!(api.search_calls.borrow()[0].1, 50);
    }

    #[test]
    fn transport_error_is_yielded_once_and_ends_the_sequence() {
        let api = MockApi::failing_search();
        let mut iter = iterate_pages(&api, "type = page", &[], 0, None);
        assert!(iter.next().expect("yielded").is_err());
        assert!(iter.next().is_none());
        assert_eq!(api.search_calls.borrow().len(), 1);
    }

    #[test]
    fn find_exactly_one_rejects_ambiguity() {
        let api = canned(2);
        let error = find_exactly_one(&api, "type = page", &[]).expect_err("must fail");
        assert!(error.to_string().contains("ambiguous"));

        let api = canned(1);
        let found = find_exactly_one(&api, "type = page", &[]).expect("one");
        assert_eq!(found.title, "Page 0");

        let api = canned(0);
        let error = find_exactly_one(&api, "type = page", &[]).expect_err("must fail");
        assert!(error.to_string().contains("no page matches"));
    }
}
