use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::{number_from, Gaps, NormalizeError};
use crate::document::ExtractionKind;
use crate::extraction::{TocEntry, TocResult, UNKNOWN};

/// Leading section number such as `2`, `2.1` or `3.4.1.`
static SECTION_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)*)\.?\s+\S").expect("valid regex"));

/// Heading depth implied by dotted numbering; 1 when unnumbered
pub(crate) fn infer_level(title: &str) -> u32 {
    SECTION_NUMBER
        .captures(title)
        .and_then(|c| c.get(1))
        .map(|number| number.as_str().split('.').count() as u32)
        .unwrap_or(1)
}

fn page_from(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(number_from)
        .filter(|page| *page >= 1.0 && page.fract() == 0.0 && *page <= u32::MAX as f64)
        .map(|page| page as u32)
}

fn clean_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(super) fn normalize(body: &Value, gaps: &mut Gaps) -> Result<TocResult, NormalizeError> {
    let object = body
        .as_object()
        .ok_or_else(|| NormalizeError::unrecognized(ExtractionKind::Toc, "expected an object"))?;

    let mut entries = match object.get("entries") {
        Some(Value::Array(items)) => from_entries(items, gaps),
        Some(_) => {
            return Err(NormalizeError::unrecognized(
                ExtractionKind::Toc,
                "entries is not a list",
            ))
        }
        None => match object.get("topic_map") {
            Some(Value::Object(map)) => from_topic_map(map, gaps)?,
            Some(_) => {
                return Err(NormalizeError::unrecognized(
                    ExtractionKind::Toc,
                    "topic_map is not an object",
                ))
            }
            None => from_topic_map(object, gaps)?,
        },
    };

    if entries.is_empty() {
        gaps.note("entries");
    }

    fill_end_pages(&mut entries);
    Ok(TocResult { entries })
}

/// `[{title, page, level?}]`
fn from_entries(items: &[Value], gaps: &mut Gaps) -> Vec<TocEntry> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let title = match item.get("title").and_then(Value::as_str).map(clean_title) {
                Some(title) if !title.is_empty() => title,
                _ => {
                    gaps.note(format!("entries[{}].title", i));
                    UNKNOWN.to_string()
                }
            };

            let page = page_from(item.get("page"));
            if page.is_none() {
                gaps.note(format!("entries[{}].page", i));
            }

            let level = item
                .get("level")
                .and_then(Value::as_u64)
                .filter(|level| *level >= 1)
                .map(|level| level as u32)
                .unwrap_or_else(|| infer_level(&title));

            TocEntry {
                title,
                level,
                page,
                end_page: None,
            }
        })
        .collect()
}

/// `{"Title": [start, end|null]}`, ordered by start page then title
fn from_topic_map(map: &Map<String, Value>, gaps: &mut Gaps) -> Result<Vec<TocEntry>, NormalizeError> {
    if map.values().any(|v| !v.is_array()) {
        return Err(NormalizeError::unrecognized(
            ExtractionKind::Toc,
            "no entries list or topic map",
        ));
    }

    let mut entries: Vec<TocEntry> = map
        .iter()
        .map(|(title, range)| {
            let title = clean_title(title);
            let start = page_from(range.get(0));
            if start.is_none() {
                gaps.note(format!("topic_map[{}].start", title));
            }
            TocEntry {
                level: infer_level(&title),
                title,
                page: start,
                end_page: page_from(range.get(1)),
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        a.page
            .unwrap_or(u32::MAX)
            .cmp(&b.page.unwrap_or(u32::MAX))
            .then_with(|| a.title.cmp(&b.title))
    });
    Ok(entries)
}

/// An entry ends where the next one starts, unless the next starts earlier
fn fill_end_pages(entries: &mut [TocEntry]) {
    for i in 0..entries.len() {
        if entries[i].end_page.is_some() {
            continue;
        }
        let next = entries.get(i + 1).and_then(|next| next.page);
        entries[i].end_page = match (entries[i].page, next) {
            (Some(start), Some(next)) if next >= start => Some(next),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(result: &TocResult) -> Vec<(&str, u32, Option<u32>)> {
        result
            .entries
            .iter()
            .map(|e| (e.title.as_str(), e.level, e.page))
            .collect()
    }

    #[test]
    fn test_three_heading_sample() {
        let body = json!({
            "entries": [
                { "title": "Intro", "page": 1 },
                { "title": "Methods", "page": 4 },
                { "title": "Results", "page": 9, "level": 2 }
            ]
        });
        let mut gaps = Gaps::default();
        let result = normalize(&body, &mut gaps).unwrap();

        assert_eq!(
            summary(&result),
            vec![("Intro", 1, Some(1)), ("Methods", 1, Some(4)), ("Results", 2, Some(9))]
        );
        assert_eq!(result.entries[0].end_page, Some(4));
        assert_eq!(result.entries[2].end_page, None);
        assert!(gaps.into_vec().is_empty());
    }

    #[test]
    fn test_level_inferred_from_numbering() {
        assert_eq!(infer_level("2.1 Sampling"), 2);
        assert_eq!(infer_level("3.4.1. Edge cases"), 3);
        assert_eq!(infer_level("4 Results"), 1);
        assert_eq!(infer_level("Appendix"), 1);
        assert_eq!(infer_level("2024 in review"), 1);
    }

    #[test]
    fn test_topic_map_shape() {
        let body = json!({
            "topic_map": {
                "Results": [9, null],
                "Intro": [1, 4],
                "Methods": [4, 9],
                "Appendix": [9, 12]
            }
        });
        let mut gaps = Gaps::default();
        let result = normalize(&body, &mut gaps).unwrap();

        assert_eq!(
            summary(&result),
            vec![
                ("Intro", 1, Some(1)),
                ("Methods", 1, Some(4)),
                ("Appendix", 1, Some(9)),
                ("Results", 1, Some(9)),
            ]
        );
        assert_eq!(result.entries[1].end_page, Some(9));
        assert_eq!(result.entries[3].end_page, None);
    }

    #[test]
    fn test_bare_topic_map() {
        let body = json!({ "Intro": [1, 2], "Body": [2, null] });
        let result = normalize(&body, &mut Gaps::default()).unwrap();
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[0].title, "Intro");
    }

    #[test]
    fn test_missing_fields_become_gaps() {
        let body = json!({
            "entries": [
                { "page": "3" },
                { "title": "Later", "page": "n/a" }
            ]
        });
        let mut gaps = Gaps::default();
        let result = normalize(&body, &mut gaps).unwrap();

        assert_eq!(result.entries[0].title, UNKNOWN);
        assert_eq!(result.entries[0].page, Some(3));
        assert_eq!(result.entries[1].page, None);
        assert_eq!(
            gaps.into_vec(),
            vec!["entries[0].title", "entries[1].page"]
        );
    }

    #[test]
    fn test_empty_toc_is_degraded_not_failed() {
        let mut gaps = Gaps::default();
        let result = normalize(&json!({ "source": "none", "entries": [] }), &mut gaps).unwrap();
        assert!(result.entries.is_empty());
        assert_eq!(gaps.into_vec(), vec!["entries"]);
    }

    #[test]
    fn test_backwards_page_has_no_end() {
        let body = json!({
            "entries": [
                { "title": "B", "page": 10 },
                { "title": "A", "page": 2 }
            ]
        });
        let result = normalize(&body, &mut Gaps::default()).unwrap();
        assert_eq!(result.entries[0].end_page, None);
    }

    #[test]
    fn test_unrecognized_object() {
        let result = normalize(&json!({ "status": "ok" }), &mut Gaps::default());
        assert!(result.is_err());
    }
}
