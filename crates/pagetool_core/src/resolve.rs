use std::fmt;

/// A user-supplied page reference, parsed into its recognized form.
///
/// Parsing never fails: input that matches none of the known shapes is
/// carried verbatim as an already-valid query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRef {
    /// Purely decimal digits, e.g. `12345`.
    Id(String),
    /// `SPACE:Title text` with an all-uppercase space key.
    SpaceTitle { space: String, title: String },
    /// `:Title text` with the space left implied.
    Title(String),
    /// A resource path whose last segment is a numeric content id,
    /// e.g. `https://host/rest/api/content/12345`.
    ContentUri { uri: String, id: String },
    /// Anything else: assumed to already be a query.
    Query(String),
}

impl PageRef {
    pub fn parse(input: &str) -> Self {
        if let Some((space, title)) = split_space_title(input) {
            return Self::SpaceTitle {
                space: space.to_string(),
                title: title.to_string(),
            };
        }
        if let Some(title) = input.strip_prefix(':') {
            return Self::Title(title.to_string());
        }
        if is_decimal(input) {
            return Self::Id(input.to_string());
        }
        if let Some(id) = content_uri_id(input) {
            return Self::ContentUri {
                uri: input.to_string(),
                id: id.to_string(),
            };
        }
        Self::Query(input.to_string())
    }

    /// Render the reference as a query in the remote query language.
    ///
    /// Titles are embedded verbatim; a title containing `"` produces an
    /// unescaped quote in the query (intended behavior for such titles is
    /// unspecified upstream).
    pub fn to_query(&self) -> String {
        match self {
            Self::Id(id) => format!("ID = {id}"),
            Self::SpaceTitle { space, title } => {
                format!("space = {space} AND title = \"{title}\"")
            }
            Self::Title(title) => format!("title = \"{title}\""),
            Self::ContentUri { id, .. } => format!("ID = {id}"),
            Self::Query(query) => query.clone(),
        }
    }

    /// The literal title this reference names, if it names one.
    ///
    /// Used by the tree synchronizer to title a page it is about to create:
    /// a raw query string doubles as the title in that position, matching
    /// how callers pass a not-yet-existing page by bare name.
    pub fn title_hint(&self) -> Option<&str> {
        match self {
            Self::SpaceTitle { title, .. } | Self::Title(title) => Some(title),
            Self::Query(raw) => Some(raw),
            Self::Id(_) | Self::ContentUri { .. } => None,
        }
    }

    /// The numeric identifier this reference carries, if any.
    pub fn id_hint(&self) -> Option<&str> {
        match self {
            Self::Id(id) | Self::ContentUri { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::SpaceTitle { space, title } => write!(f, "{space}:{title}"),
            Self::Title(title) => write!(f, ":{title}"),
            Self::ContentUri { uri, .. } => write!(f, "{uri}"),
            Self::Query(query) => write!(f, "{query}"),
        }
    }
}

/// Resolve arbitrary caller input to a query string. First matching rule
/// wins; unrecognized input passes through unchanged, so the function never
/// fails and is idempotent on its own output.
pub fn resolve_query(input: &str) -> String {
    PageRef::parse(input).to_query()
}

fn split_space_title(input: &str) -> Option<(&str, &str)> {
    let (space, title) = input.split_once(':')?;
    if space.is_empty() || !space.chars().all(|ch| ch.is_ascii_uppercase()) {
        return None;
    }
    Some((space, title))
}

fn is_decimal(input: &str) -> bool {
    !input.is_empty() && input.chars().all(|ch| ch.is_ascii_digit())
}

fn content_uri_id(input: &str) -> Option<&str> {
    let (_, tail) = input.rsplit_once("api/content/")?;
    if is_decimal(tail) { Some(tail) } else { None }
}
