use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::client::ContentApi;
use crate::page::ContentItem;
use crate::resolve::PageRef;

#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Source page reference (id, `SPACE:Title`, `:Title`, URI, or query).
    pub source: String,
    /// Existing target reference, or the title of a page to create.
    pub target: String,
    /// Descend into children, matching them by title.
    pub recursive: bool,
    /// Parent for the target when it has to be created.
    pub parent: Option<String>,
    /// Space for created pages; defaults to the source page's space.
    pub space: Option<String>,
    /// Delete target children whose title is absent from the source.
    pub prune: bool,
}

impl CopyOptions {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            recursive: true,
            parent: None,
            space: None,
            prune: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyPageResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    /// The synchronized target root.
    pub root: ContentItem,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub pages: Vec<CopyPageResult>,
    pub request_count: usize,
}

#[derive(Default)]
struct CopyTally {
    created: usize,
    updated: usize,
    deleted: usize,
    pages: Vec<CopyPageResult>,
}

impl CopyTally {
    fn record(&mut self, title: &str, action: &str, detail: Option<String>) {
        self.pages.push(CopyPageResult {
            title: title.to_string(),
            action: action.to_string(),
            detail,
        });
    }
}

/// Where one level's target comes from. The caller's reference is looked
/// up once at the root; below that the title match against the target's
/// child set has already decided between update and create, so the
/// decision is carried down instead of re-resolving titles globally.
enum TargetSlot<'a> {
    Lookup(&'a PageRef),
    Existing(&'a str),
    Missing(&'a str),
}

/// Copy a page tree onto a target, creating or updating by title.
///
/// The target root is created when the target reference names nothing and
/// updated otherwise; with `recursive`, children on both sides are matched
/// by title and synchronized the same way, level by level. The first remote
/// failure aborts the walk where it stands — levels already written remain,
/// and a re-run converges because pages created last time match by title
/// and are updated instead.
pub fn copy_page_tree<A: ContentApi + ?Sized>(
    api: &A,
    options: &CopyOptions,
) -> Result<CopyReport> {
    let source = PageRef::parse(&options.source);
    let target = PageRef::parse(&options.target);
    let mut tally = CopyTally::default();
    let root = sync_level(
        api,
        &source,
        TargetSlot::Lookup(&target),
        options.parent.as_deref(),
        options,
        &mut tally,
    )?;
    Ok(CopyReport {
        root,
        created: tally.created,
        updated: tally.updated,
        deleted: tally.deleted,
        pages: tally.pages,
        request_count: api.request_count(),
    })
}

fn sync_level<A: ContentApi + ?Sized>(
    api: &A,
    source: &PageRef,
    target: TargetSlot<'_>,
    parent: Option<&str>,
    options: &CopyOptions,
    tally: &mut CopyTally,
) -> Result<ContentItem> {
    let source_item = api
        .get_item(source, &["body.storage", "space"])?
        .ok_or_else(|| anyhow::anyhow!("source page not found: {source}"))?;
    let body = source_item.storage_value()?;

    let existing = match &target {
        TargetSlot::Lookup(reference) => api.get_item(reference, &["version"])?,
        TargetSlot::Existing(id) => {
            let reference = PageRef::Id((*id).to_string());
            Some(api.get_item(&reference, &["version"])?.ok_or_else(|| {
                anyhow::anyhow!("target child {id} vanished during synchronization")
            })?)
        }
        TargetSlot::Missing(_) => None,
    };

    let target_item = match existing {
        None => {
            let title = match &target {
                TargetSlot::Lookup(reference) => reference.title_hint().ok_or_else(|| {
                    anyhow::anyhow!(
                        "target {reference} does not exist and is not a creatable title"
                    )
                })?,
                TargetSlot::Missing(title) => *title,
                TargetSlot::Existing(_) => unreachable!("existing target always resolves"),
            };
            let space_key = match options.space.as_deref() {
                Some(key) => key,
                None => source_item.space_key()?,
            };
            let created = api
                .create_item(space_key, title, body, parent)
                .with_context(|| format!("failed to create {space_key}:{title}"))?;
            tally.created += 1;
            tally.record(&created.title, "created", None);
            created
        }
        Some(existing) => {
            let version = existing.version_number()?;
            let updated = api
                .update_item(&existing.id, &existing.title, version, body)
                .with_context(|| format!("failed to update {}", existing.title))?;
            tally.updated += 1;
            tally.record(&existing.title, "updated", None);
            updated
        }
    };

    if options.recursive {
        let source_children = api.list_children(&source_item.id, "page", &[])?;
        let target_children = api.list_children(&target_item.id, "page", &[])?;
        // Title is the sole correlation key between the two trees, so
        // duplicate sibling titles make the match ambiguous. Both sides are
        // checked before any child is written.
        let source_by_title = key_by_title(&source_children, &source_item.title)?;
        let target_by_title = key_by_title(&target_children, &target_item.title)?;

        for (title, child) in &source_by_title {
            let child_source = PageRef::Id(child.id.clone());
            let child_target = match target_by_title.get(title) {
                Some(existing) => TargetSlot::Existing(existing.id.as_str()),
                None => TargetSlot::Missing(*title),
            };
            sync_level(
                api,
                &child_source,
                child_target,
                Some(&target_item.id),
                options,
                tally,
            )?;
        }

        if options.prune {
            for (title, child) in &target_by_title {
                if !source_by_title.contains_key(title) {
                    api.delete_item(&child.id)
                        .with_context(|| format!("failed to delete {title}"))?;
                    tally.deleted += 1;
                    tally.record(title, "deleted", Some("absent from source".to_string()));
                }
            }
        }
    }

    Ok(target_item)
}

fn key_by_title<'a>(
    children: &'a [ContentItem],
    parent_title: &str,
) -> Result<BTreeMap<&'a str, &'a ContentItem>> {
    let mut by_title = BTreeMap::new();
    for child in children {
        if by_title.insert(child.title.as_str(), child).is_some() {
            bail!(
                "duplicate sibling title \"{}\" under {parent_title}: titles must be unique to match source and target children",
                child.title
            );
        }
    }
    Ok(by_title)
}
