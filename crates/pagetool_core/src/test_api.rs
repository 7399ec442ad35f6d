//! In-memory `ContentApi` used by the module tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde_json::Value;

use crate::client::ContentApi;
use crate::page::{Body, BodyContent, ContentItem, SearchPage, SpaceRef, VersionInfo};
use crate::resolve::PageRef;

#[derive(Default)]
pub struct MockApi {
    pages: RefCell<BTreeMap<String, ContentItem>>,
    children: RefCell<BTreeMap<String, Vec<String>>>,
    properties: RefCell<BTreeMap<(String, String), Value>>,
    canned_results: RefCell<Vec<ContentItem>>,
    next_id: Cell<u64>,
    fail_search: Cell<bool>,
    request_count: Cell<usize>,
    pub search_calls: RefCell<Vec<(String, usize, usize)>>,
    pub created: RefCell<Vec<String>>,
    pub updated: RefCell<Vec<(String, i64)>>,
    pub deleted: RefCell<Vec<String>>,
    pub labeled: RefCell<Vec<(String, Vec<String>)>>,
}

pub fn item(id: &str, title: &str, space: &str, version: i64, body: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        title: title.to_string(),
        space: Some(SpaceRef {
            key: space.to_string(),
        }),
        version: Some(VersionInfo { number: version }),
        body: Some(Body {
            storage: Some(BodyContent {
                value: body.to_string(),
                representation: "storage".to_string(),
            }),
        }),
        ancestors: Vec::new(),
    }
}

impl MockApi {
    pub fn with_canned_results(results: Vec<ContentItem>) -> Self {
        let api = Self::default();
        *api.canned_results.borrow_mut() = results;
        api
    }

    pub fn failing_search() -> Self {
        let api = Self::default();
        api.fail_search.set(true);
        api
    }

    pub fn insert_page(&self, page: ContentItem, parent: Option<&str>) {
        if let Some(parent) = parent {
            self.children
                .borrow_mut()
                .entry(parent.to_string())
                .or_default()
                .push(page.id.clone());
        }
        self.pages.borrow_mut().insert(page.id.clone(), page);
    }

    pub fn set_property(&self, id: &str, name: &str, value: Value) {
        self.properties
            .borrow_mut()
            .insert((id.to_string(), name.to_string()), value);
    }

    pub fn page(&self, id: &str) -> Option<ContentItem> {
        self.pages.borrow().get(id).cloned()
    }

    pub fn page_by_title(&self, title: &str) -> Option<ContentItem> {
        self.pages
            .borrow()
            .values()
            .find(|page| page.title == title)
            .cloned()
    }

    fn bump(&self) {
        self.request_count.set(self.request_count.get() + 1);
    }

    fn find_by_title(&self, title: &str) -> Vec<ContentItem> {
        self.pages
            .borrow()
            .values()
            .filter(|page| page.title == title)
            .cloned()
            .collect()
    }
}

impl ContentApi for MockApi {
    fn search_by_query(
        &self,
        query: &str,
        _expand: &[&str],
        start: usize,
        limit: usize,
    ) -> Result<SearchPage> {
        self.bump();
        self.search_calls
            .borrow_mut()
            .push((query.to_string(), start, limit));
        if self.fail_search.get() {
            bail!("remote request failed with HTTP 502 for /rest/api/content/search");
        }
        let matches = if let Some(title) = query
            .strip_prefix("title = \"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            self.find_by_title(title)
        } else {
            self.canned_results.borrow().clone()
        };
        let results = matches
            .into_iter()
            .skip(start)
            .take(limit)
            .collect::<Vec<_>>();
        Ok(SearchPage {
            start,
            size: results.len(),
            limit,
            results,
        })
    }

    fn get_item(&self, reference: &PageRef, _expand: &[&str]) -> Result<Option<ContentItem>> {
        self.bump();
        if let Some(id) = reference.id_hint() {
            return Ok(self.pages.borrow().get(id).cloned());
        }
        let title = match reference {
            PageRef::SpaceTitle { title, .. } | PageRef::Title(title) | PageRef::Query(title) => {
                title
            }
            _ => unreachable!(),
        };
        let mut hits = self.find_by_title(title);
        match hits.len() {
            0 => Ok(None),
            1 => Ok(Some(hits.remove(0))),
            _ => bail!("ambiguous page reference: {reference}"),
        }
    }

    fn create_item(
        &self,
        space: &str,
        title: &str,
        body: &str,
        parent: Option<&str>,
    ) -> Result<ContentItem> {
        self.bump();
        let id = self.next_id.get() + 1000;
        self.next_id.set(self.next_id.get() + 1);
        let page = item(&id.to_string(), title, space, 1, body);
        self.insert_page(page.clone(), parent);
        self.created.borrow_mut().push(title.to_string());
        Ok(page)
    }

    fn update_item(
        &self,
        id: &str,
        title: &str,
        version: i64,
        body: &str,
    ) -> Result<ContentItem> {
        self.bump();
        let mut pages = self.pages.borrow_mut();
        let page = match pages.get_mut(id) {
            Some(page) => page,
            None => bail!("remote request failed with HTTP 404 for /rest/api/content/{id}"),
        };
        page.body = Some(Body {
            storage: Some(BodyContent {
                value: body.to_string(),
                representation: "storage".to_string(),
            }),
        });
        page.version = Some(VersionInfo {
            number: version + 1,
        });
        let updated = page.clone();
        drop(pages);
        self.updated.borrow_mut().push((title.to_string(), version));
        Ok(updated)
    }

    fn delete_item(&self, id: &str) -> Result<()> {
        self.bump();
        self.pages.borrow_mut().remove(id);
        for children in self.children.borrow_mut().values_mut() {
            children.retain(|child| child != id);
        }
        self.deleted.borrow_mut().push(id.to_string());
        Ok(())
    }

    fn list_children(
        &self,
        id: &str,
        _child_type: &str,
        _expand: &[&str],
    ) -> Result<Vec<ContentItem>> {
        self.bump();
        let ids = self.children.borrow().get(id).cloned().unwrap_or_default();
        let pages = self.pages.borrow();
        Ok(ids
            .iter()
            .filter_map(|child| pages.get(child).cloned())
            .collect())
    }

    fn get_property(&self, item: &ContentItem, name: &str) -> Result<Option<Value>> {
        self.bump();
        Ok(self
            .properties
            .borrow()
            .get(&(item.id.clone(), name.to_string()))
            .cloned())
    }

    fn add_labels(&self, id: &str, labels: &[String]) -> Result<()> {
        self.bump();
        self.labeled
            .borrow_mut()
            .push((id.to_string(), labels.to_vec()));
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count.get()
    }
}
