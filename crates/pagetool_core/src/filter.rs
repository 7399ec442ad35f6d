use anyhow::{Result, bail};
use serde_json::Value;

use crate::client::ContentApi;
use crate::page::ContentItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOp {
    Eq,
    Ne,
}

/// One property comparison, parsed from `name==value` or `name!=value`.
/// Multiple specs are ANDed by the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFilterSpec {
    pub name: String,
    pub op: PropertyOp,
    pub value: String,
}

impl PropertyFilterSpec {
    pub fn parse(input: &str) -> Result<Self> {
        let bytes = input.as_bytes();
        for index in 0..bytes.len().saturating_sub(1) {
            let op = match (bytes[index], bytes[index + 1]) {
                (b'=', b'=') => PropertyOp::Eq,
                (b'!', b'=') => PropertyOp::Ne,
                _ => continue,
            };
            let name = &input[..index];
            if name.is_empty() {
                break;
            }
            return Ok(Self {
                name: name.to_string(),
                op,
                value: input[index + 2..].to_string(),
            });
        }
        bail!("invalid property filter (expected name==value or name!=value): {input}")
    }

    /// Evaluate against a looked-up property value. A collection compares
    /// by membership, a scalar by equality; an absent property never equals
    /// the expected value.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let holds = match value {
            None => false,
            Some(Value::Array(items)) => items.iter().any(|item| scalar_matches(item, &self.value)),
            Some(other) => scalar_matches(other, &self.value),
        };
        match self.op {
            PropertyOp::Eq => holds,
            PropertyOp::Ne => !holds,
        }
    }
}

fn scalar_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(text) => text == expected,
        Value::Number(_) | Value::Bool(_) => value.to_string() == expected,
        _ => false,
    }
}

/// Streaming property filter over an item sequence.
///
/// Each spec costs one property lookup per item; items are checked and
/// yielded one at a time in input order, and a lookup failure ends the
/// stream with that error.
pub struct FilteredPages<'a, A: ContentApi + ?Sized, I> {
    api: &'a A,
    items: I,
    specs: Vec<PropertyFilterSpec>,
}

pub fn filter_pages<'a, A, I>(
    api: &'a A,
    items: I,
    specs: Vec<PropertyFilterSpec>,
) -> FilteredPages<'a, A, I>
where
    A: ContentApi + ?Sized,
    I: Iterator<Item = Result<ContentItem>>,
{
    FilteredPages { api, items, specs }
}

impl<A, I> Iterator for FilteredPages<'_, A, I>
where
    A: ContentApi + ?Sized,
    I: Iterator<Item = Result<ContentItem>>,
{
    type Item = Result<ContentItem>;

    fn next(&mut self) -> Option<Self::Item> {
        'items: loop {
            let item = match self.items.next()? {
                Ok(item) => item,
                Err(error) => return Some(Err(error)),
            };
            for spec in &self.specs {
                let value = match self.api.get_property(&item, &spec.name) {
                    Ok(value) => value,
                    Err(error) => return Some(Err(error)),
                };
                if !spec.matches(value.as_ref()) {
                    continue 'items;
                }
            }
            return Some(Ok(item));
        }
    }
}
