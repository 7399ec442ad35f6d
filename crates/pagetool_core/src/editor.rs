use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use similar::TextDiff;

use crate::client::ContentApi;
use crate::filter::{PropertyFilterSpec, filter_pages};
use crate::page::ContentItem;
use crate::query::iterate_pages;

/// Produces a replacement storage body for a page.
pub trait PageEditor {
    fn edit(&self, item: &ContentItem) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

/// Declarative edit document, usually loaded from YAML:
///
/// ```yaml
/// templates:
///   banner: "<p>Owner: {{owner}}</p>"
/// actions:
///   - mode: prepend
///     template: banner
///     data:
///       owner: docs-team
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditSpec {
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default)]
    pub actions: Vec<EditAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditAction {
    #[serde(default)]
    pub mode: ApplyMode,
    /// Literal content; mutually exclusive with `template`.
    #[serde(default)]
    pub content: Option<String>,
    /// Name of an entry in `templates`.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Data-driven editor: renders each action's content with `{{key}}`
/// placeholders and applies it to the body in order.
pub struct TemplateEditor {
    spec: EditSpec,
    data: BTreeMap<String, String>,
}

impl TemplateEditor {
    pub fn new(spec: EditSpec) -> Result<Self> {
        if spec.actions.is_empty() {
            bail!("edit spec has no actions");
        }
        Ok(Self {
            spec,
            data: BTreeMap::new(),
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let spec: EditSpec = serde_yaml::from_str(text).context("failed to parse edit spec")?;
        Self::new(spec)
    }

    /// Caller-supplied data, overriding per-action data on key conflicts.
    pub fn with_data(mut self, data: BTreeMap<String, String>) -> Self {
        self.data = data;
        self
    }

    fn render_action(&self, action: &EditAction, item: &ContentItem) -> Result<String> {
        let template = match (&action.content, &action.template) {
            (Some(content), None) => content.as_str(),
            (None, Some(name)) => self
                .spec
                .templates
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| anyhow::anyhow!("unknown template: {name}"))?,
            (Some(_), Some(_)) => bail!("action has both content and template"),
            (None, None) => bail!("action has neither content nor template"),
        };
        Ok(render_template(template, |key| {
            self.data
                .get(key)
                .or_else(|| action.data.get(key))
                .cloned()
                .or_else(|| match key {
                    "title" => Some(item.title.clone()),
                    "id" => Some(item.id.clone()),
                    _ => None,
                })
        }))
    }
}

impl PageEditor for TemplateEditor {
    fn edit(&self, item: &ContentItem) -> Result<String> {
        let mut body = item.storage_value()?.to_string();
        for action in &self.spec.actions {
            let content = self.render_action(action, item)?;
            body = match action.mode {
                ApplyMode::Replace => content,
                ApplyMode::Append => format!("{body}{content}"),
                ApplyMode::Prepend => format!("{content}{body}"),
            };
        }
        Ok(body)
    }
}

/// Substitute `{{key}}` placeholders; unknown keys render empty.
fn render_template(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = after[..close].trim();
                if let Some(value) = lookup(key) {
                    output.push_str(&value);
                }
                rest = &after[close + 2..];
            }
            None => {
                output.push_str(&rest[open..]);
                return output;
            }
        }
    }
    output.push_str(rest);
    output
}

/// Resolve, iterate, filter, and lazily pair each page with its edited
/// body. Nothing is written; consuming the sequence drives the fetches.
pub fn edit_pages<'a, A, E>(
    api: &'a A,
    reference: &str,
    specs: Vec<PropertyFilterSpec>,
    editor: &'a E,
) -> impl Iterator<Item = Result<(ContentItem, String)>> + 'a
where
    A: ContentApi + ?Sized,
    E: PageEditor,
{
    let items = iterate_pages(api, reference, &["body.storage", "version", "space"], 0, None);
    filter_pages(api, items, specs).map(move |result| {
        let item = result?;
        let body = editor.edit(&item)?;
        Ok((item, body))
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct EditPageResult {
    pub title: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditReport {
    pub dry_run: bool,
    pub edited: usize,
    pub unchanged: usize,
    pub pages: Vec<EditPageResult>,
    pub request_count: usize,
}

/// Apply an editor across every page a reference selects.
///
/// Pages whose edited body hashes identical to the current one are left
/// untouched. With `dry_run` the report carries the diffs but nothing is
/// written; otherwise each changed page is updated with the version that
/// was just read.
pub fn apply_edits<A, E>(
    api: &A,
    reference: &str,
    specs: Vec<PropertyFilterSpec>,
    editor: &E,
    dry_run: bool,
) -> Result<EditReport>
where
    A: ContentApi + ?Sized,
    E: PageEditor,
{
    let mut report = EditReport {
        dry_run,
        edited: 0,
        unchanged: 0,
        pages: Vec::new(),
        request_count: 0,
    };

    for entry in edit_pages(api, reference, specs, editor) {
        let (item, new_body) = entry?;
        let current = item.storage_value()?;
        if content_hash(current) == content_hash(&new_body) {
            report.unchanged += 1;
            report.pages.push(EditPageResult {
                title: item.title.clone(),
                action: "unchanged".to_string(),
                diff: None,
            });
            continue;
        }

        let diff = TextDiff::from_lines(current, new_body.as_str())
            .unified_diff()
            .header(&item.title, &item.title)
            .to_string();
        if dry_run {
            report.edited += 1;
            report.pages.push(EditPageResult {
                title: item.title.clone(),
                action: "would_update".to_string(),
                diff: Some(diff),
            });
            continue;
        }

        api.update_item(&item.id, &item.title, item.version_number()?, &new_body)
            .with_context(|| format!("failed to update {}", item.title))?;
        report.edited += 1;
        report.pages.push(EditPageResult {
            title: item.title.clone(),
            action: "updated".to_string(),
            diff: Some(diff),
        });
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{PageEditor, TemplateEditor, apply_edits, render_template};
    use crate::test_api::{MockApi, item};

    fn editor(yaml: &str) -> TemplateEditor {
        TemplateEditor::from_yaml(yaml).expect("parse editor")
    }

    #[test]
    fn renders_placeholders_and_drops_unknown_keys() {
        let rendered = render_template("<p>{{greeting}}, {{name}}!{{missing}}</p>", |key| {
            match key {
                "greeting" => Some("Hello".to_string()),
                "name" => Some("World".to_string()),
                _ => None,
            }
        });
        assert_eq!(rendered, "<p>Hello, World!</p>");
    }

    #[test]
    fn unterminated_placeholder_is_kept_verbatim() {
        let rendered = render_template("<p>{{open", |_| None);
        assert_eq!(rendered, "<p>{{open");
    }

    #[test]
    fn apply_modes_compose_in_action_order() {
        let editor = editor(
            r#"
actions:
  - mode: replace
    content: "<p>core</p>"
  - mode: prepend
    content: "<p>head</p>"
  - mode: append
    content: "<p>tail</p>"
"#,
        );
        let page = item("1", "Alpha", "DOC", 1, "<p>old</p>");
        let body = editor.edit(&page).expect("edit");
        assert_eq!(body, "<p>head</p><p>core</p><p>tail</p>");
    }

    #[test]
    fn template_actions_resolve_named_templates_with_data() {
        let editor = editor(
            r#"
templates:
  banner: "<p>{{title}} is owned by {{owner}}</p>"
actions:
  - mode: replace
    template: banner
    data:
      owner: docs-team
"#,
        );
        let page = item("1", "Alpha", "DOC", 1, "<p>old</p>");
        assert_eq!(
            editor.edit(&page).expect("edit"),
            "<p>Alpha is owned by docs-team</p>"
        );
    }

    #[test]
    fn caller_data_overrides_action_data() {
        let editor = editor(
            r#"
actions:
  - mode: replace
    content: "<p>{{owner}}</p>"
    data:
      owner: from-action
"#,
        )
        .with_data(BTreeMap::from([(
            "owner".to_string(),
            "from-caller".to_string(),
        )]));
        let page = item("1", "Alpha", "DOC", 1, "<p>old</p>");
        assert_eq!(editor.edit(&page).expect("edit"), "<p>from-caller</p>");
    }

    #[test]
    fn spec_without_actions_is_rejected() {
        assert!(TemplateEditor::from_yaml("templates: {}").is_err());
    }

    #[test]
    fn unknown_template_is_an_error() {
        let editor = editor(
            r#"
actions:
  - template: nope
"#,
        );
        let page = item("1", "Alpha", "DOC", 1, "<p>old</p>");
        assert!(editor.edit(&page).is_err());
    }

    #[test]
    fn apply_edits_updates_changed_pages_and_skips_unchanged() {
        let api = MockApi::with_canned_results(vec![
            item("1", "Alpha", "DOC", 3, "<p>old</p>"),
            item("2", "Beta", "DOC", 1, "<p>new</p>"),
        ]);
        api.insert_page(item("1", "Alpha", "DOC", 3, "<p>old</p>"), None);
        api.insert_page(item("2", "Beta", "DOC", 1, "<p>new</p>"), None);

        let editor = editor(
            r#"
actions:
  - mode: replace
    content: "<p>new</p>"
"#,
        );
        let report =
            apply_edits(&api, "type = page", Vec::new(), &editor, false).expect("apply");

        assert_eq!(report.edited, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(*api.updated.borrow(), vec![("Alpha".to_string(), 3)]);
        let page = api.page("1").expect("Alpha");
        assert_eq!(page.storage_value().expect("body"), "<p>new</p>");
        let diff = report.pages[0].diff.as_ref().expect("diff");
        assert!(diff.contains("-<p>old</p>"));
        assert!(diff.contains("+<p>new</p>"));
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let api = MockApi::with_canned_results(vec![item("1", "Alpha", "DOC", 3, "<p>old</p>")]);
        api.insert_page(item("1", "Alpha", "DOC", 3, "<p>old</p>"), None);

        let editor = editor(
            r#"
actions:
  - mode: replace
    content: "<p>new</p>"
"#,
        );
        let report = apply_edits(&api, "type = page", Vec::new(), &editor, true).expect("apply");

        assert!(report.dry_run);
        assert_eq!(report.edited, 1);
        assert_eq!(report.pages[0].action, "would_update");
        assert!(api.updated.borrow().is_empty());
        let page = api.page("1").expect("Alpha");
        assert_eq!(page.storage_value().expect("body"), "<p>old</p>");
    }
}
