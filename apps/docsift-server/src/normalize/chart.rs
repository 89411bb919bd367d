use serde_json::{Map, Value};

use super::{number_from, Gaps, NormalizeError};
use crate::document::ExtractionKind;
use crate::extraction::{Axis, ChartResult, DataPoint, Series, Trend, UNKNOWN};

/// Keys that mark an object as chart data
const CHART_KEYS: &[&str] = &[
    "title",
    "chart_title",
    "axes",
    "x_axis",
    "y_axis",
    "x_axis_label",
    "y_axis_label",
    "series",
    "data",
    "data_points",
    "dataPoints",
    "trend",
];

const POINT_LABEL_KEYS: &[&str] = &["label", "name", "category", "x_label"];
const POINT_VALUE_KEYS: &[&str] = &["value", "y", "count", "amount"];

fn error(reason: impl Into<String>) -> NormalizeError {
    NormalizeError::unrecognized(ExtractionKind::Chart, reason)
}

pub(super) fn normalize(body: &Value, gaps: &mut Gaps) -> Result<ChartResult, NormalizeError> {
    let chart = chart_object(body)?;
    let chart = match chart.get("chart") {
        Some(Value::Object(inner)) => inner.clone(),
        _ => chart,
    };

    let title = ["title", "chart_title"]
        .iter()
        .find_map(|key| chart.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    if title.is_none() {
        gaps.note("title");
    }

    let axes = axes(&chart, gaps);
    let default_name = axes
        .get(1)
        .map(|axis| axis.label.clone())
        .filter(|label| label != UNKNOWN)
        .unwrap_or_else(|| "values".to_string());
    let series = series(&chart, &default_name, gaps);
    let trend = trend(&chart, &series, gaps);

    Ok(ChartResult {
        title,
        axes,
        series,
        trend,
    })
}

// ============================================================================
// Envelope
// ============================================================================

/// The chart JSON, from a chat-completions envelope or bare
fn chart_object(body: &Value) -> Result<Map<String, Value>, NormalizeError> {
    let object = body.as_object().ok_or_else(|| error("expected an object"))?;

    if let Some(choices) = object.get("choices") {
        let content = choices
            .get(0)
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| error("completion has no message content"))?;

        let parsed: Value = serde_json::from_str(strip_fences(content))
            .map_err(|e| error(format!("completion content is not JSON: {}", e)))?;

        return match parsed {
            Value::Object(map) => Ok(map),
            _ => Err(error("completion content is not a JSON object")),
        };
    }

    if CHART_KEYS.iter().any(|key| object.contains_key(*key)) || object.contains_key("chart") {
        return Ok(object.clone());
    }

    Err(error("no chart fields"))
}

/// Body of a ```json fenced block, or the outermost braces of the text
pub(crate) fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        let inner = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
        return inner.trim();
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

// ============================================================================
// Axes
// ============================================================================

/// Split `Revenue (USD)` into label and unit
pub(crate) fn split_unit(label: &str) -> (String, Option<String>) {
    let label = label.trim();
    if let Some(open) = label.rfind('(') {
        if label.ends_with(')') && open > 0 {
            let unit = label[open + 1..label.len() - 1].trim();
            let name = label[..open].trim();
            if !unit.is_empty() && !name.is_empty() {
                return (name.to_string(), Some(unit.to_string()));
            }
        }
    }
    (label.to_string(), None)
}

fn axis_from(value: &Value) -> Option<Axis> {
    let (label, explicit_unit) = match value {
        Value::String(label) => (label.as_str(), None),
        Value::Object(map) => (
            ["label", "title", "name"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))?,
            map.get("unit").and_then(Value::as_str).map(str::to_string),
        ),
        _ => return None,
    };

    let (label, parsed_unit) = split_unit(label);
    if label.is_empty() {
        return None;
    }
    Some(Axis {
        label,
        unit: explicit_unit.or(parsed_unit),
    })
}

fn axes(chart: &Map<String, Value>, gaps: &mut Gaps) -> Vec<Axis> {
    match chart.get("axes") {
        Some(Value::Array(items)) => {
            return items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    axis_from(item).unwrap_or_else(|| {
                        gaps.note(format!("axes[{}].label", i));
                        unknown_axis()
                    })
                })
                .collect();
        }
        Some(Value::Object(map)) => {
            return ["x", "y"]
                .iter()
                .map(|key| {
                    map.get(*key).and_then(axis_from).unwrap_or_else(|| {
                        gaps.note(format!("axes.{}.label", key));
                        unknown_axis()
                    })
                })
                .collect();
        }
        _ => {}
    }

    let x = ["x_axis_label", "x_axis"]
        .iter()
        .find_map(|key| chart.get(*key).and_then(axis_from));
    let y = ["y_axis_label", "y_axis"]
        .iter()
        .find_map(|key| chart.get(*key).and_then(axis_from));

    if x.is_none() && y.is_none() {
        gaps.note("axes");
        return Vec::new();
    }

    vec![
        x.unwrap_or_else(|| {
            gaps.note("axes.x.label");
            unknown_axis()
        }),
        y.unwrap_or_else(|| {
            gaps.note("axes.y.label");
            unknown_axis()
        }),
    ]
}

fn unknown_axis() -> Axis {
    Axis {
        label: UNKNOWN.to_string(),
        unit: None,
    }
}

// ============================================================================
// Series
// ============================================================================

fn series(chart: &Map<String, Value>, default_name: &str, gaps: &mut Gaps) -> Vec<Series> {
    if let Some(Value::Array(items)) = chart.get("series") {
        // A list of series objects, or a bare list of points
        if items.iter().all(is_series_object) && !items.is_empty() {
            return items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let name = item
                        .get("name")
                        .or_else(|| item.get("label"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            gaps.note(format!("series[{}].name", i));
                            UNKNOWN.to_string()
                        });
                    let raw_points = ["points", "data", "data_points", "dataPoints", "values"]
                        .iter()
                        .find_map(|key| item.get(*key));
                    let points = match raw_points {
                        Some(raw) => points(raw, &format!("series[{}]", i), gaps),
                        None => {
                            gaps.note(format!("series[{}].points", i));
                            Vec::new()
                        }
                    };
                    Series { name, points }
                })
                .collect();
        }
    }

    for key in ["series", "data", "data_points", "dataPoints"] {
        if let Some(raw) = chart.get(key) {
            return vec![Series {
                name: default_name.to_string(),
                points: points(raw, "series[0]", gaps),
            }];
        }
    }

    gaps.note("series");
    Vec::new()
}

fn is_series_object(value: &Value) -> bool {
    value.as_object().map_or(false, |map| {
        ["points", "data", "data_points", "dataPoints", "values"]
            .iter()
            .any(|key| map.contains_key(*key))
    })
}

fn points(raw: &Value, path: &str, gaps: &mut Gaps) -> Vec<DataPoint> {
    let items: Vec<DataPoint> = match raw {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(j, item)| point(item, &format!("{}.points[{}]", path, j), gaps))
            .collect(),
        // {label: value}
        Value::Object(map) => map
            .iter()
            .enumerate()
            .map(|(j, (label, value))| {
                let value = number_from(value);
                if value.is_none() {
                    gaps.note(format!("{}.points[{}].value", path, j));
                }
                DataPoint {
                    label: Some(label.clone()),
                    x: None,
                    value,
                }
            })
            .collect(),
        _ => {
            gaps.note(format!("{}.points", path));
            Vec::new()
        }
    };
    items
}

fn point(item: &Value, path: &str, gaps: &mut Gaps) -> DataPoint {
    let mut point = DataPoint {
        label: None,
        x: None,
        value: None,
    };

    match item {
        Value::Number(_) | Value::String(_) => point.value = number_from(item),
        // [x, y]
        Value::Array(pair) if pair.len() == 2 => {
            match &pair[0] {
                Value::Number(n) => point.x = n.as_f64(),
                Value::String(s) => point.label = Some(s.clone()),
                _ => {}
            }
            point.value = number_from(&pair[1]);
        }
        Value::Object(map) => {
            point.label = POINT_LABEL_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string);
            match map.get("x") {
                Some(Value::Number(n)) => point.x = n.as_f64(),
                Some(Value::String(s)) if point.label.is_none() => point.label = Some(s.clone()),
                _ => {}
            }
            point.value = POINT_VALUE_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(number_from));
        }
        _ => {}
    }

    if point.value.is_none() {
        gaps.note(format!("{}.value", path));
    }
    point
}

// ============================================================================
// Trend
// ============================================================================

fn trend_from_text(text: &str) -> Option<Trend> {
    let text = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if has(&["fluctuat", "volatile", "mixed", "varies"]) {
        Some(Trend::Fluctuating)
    } else if has(&["increas", "upward", "rising", "grow"]) {
        Some(Trend::Increasing)
    } else if has(&["decreas", "downward", "falling", "declin"]) {
        Some(Trend::Decreasing)
    } else if has(&["flat", "stable", "constant", "steady"]) {
        Some(Trend::Flat)
    } else {
        None
    }
}

/// Direction of a value sequence
pub(crate) fn trend_of(values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::Unknown;
    }

    let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    if diffs.iter().all(|d| *d == 0.0) {
        Trend::Flat
    } else if diffs.iter().all(|d| *d >= 0.0) {
        Trend::Increasing
    } else if diffs.iter().all(|d| *d <= 0.0) {
        Trend::Decreasing
    } else {
        Trend::Fluctuating
    }
}

fn trend(chart: &Map<String, Value>, series: &[Series], gaps: &mut Gaps) -> Trend {
    if let Some(text) = chart.get("trend").and_then(Value::as_str) {
        if let Some(trend) = trend_from_text(text) {
            return trend;
        }
    }

    let values: Vec<f64> = series
        .first()
        .map(|s| s.points.iter().filter_map(|p| p.value).collect())
        .unwrap_or_default();

    let trend = trend_of(&values);
    if trend == Trend::Unknown {
        gaps.note("trend");
    }
    trend
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(content: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    #[test]
    fn test_fenced_completion() {
        let content = "Here is the data:\n```json\n{\n  \"title\": \"Monthly Sales\",\n  \"x_axis_label\": \"Month\",\n  \"y_axis_label\": \"Revenue (USD)\",\n  \"data_points\": [\n    {\"label\": \"Jan\", \"value\": 10},\n    {\"label\": \"Feb\", \"value\": 15},\n    {\"label\": \"Mar\", \"value\": 22}\n  ]\n}\n```";
        let mut gaps = Gaps::default();
        let chart = normalize(&completion(content), &mut gaps).unwrap();

        assert_eq!(chart.title.as_deref(), Some("Monthly Sales"));
        assert_eq!(chart.axes[0], Axis { label: "Month".to_string(), unit: None });
        assert_eq!(
            chart.axes[1],
            Axis { label: "Revenue".to_string(), unit: Some("USD".to_string()) }
        );
        assert_eq!(chart.series.len(), 1);
        assert_eq!(chart.series[0].name, "Revenue");
        assert_eq!(chart.series[0].points[2].label.as_deref(), Some("Mar"));
        assert_eq!(chart.series[0].points[2].value, Some(22.0));
        assert_eq!(chart.trend, Trend::Increasing);
        assert!(gaps.into_vec().is_empty());
    }

    #[test]
    fn test_bare_chart_with_series_objects() {
        let body = json!({
            "title": "Temperatures",
            "axes": [{ "label": "Day" }, { "label": "Temp", "unit": "°C" }],
            "series": [
                { "name": "Berlin", "points": [[1, 20], [2, 18], [3, 21]] },
                { "name": "Oslo", "data": { "Mon": 12, "Tue": "13" } }
            ],
            "trend": "Mixed, with a dip midweek"
        });
        let mut gaps = Gaps::default();
        let chart = normalize(&body, &mut gaps).unwrap();

        assert_eq!(chart.axes[1].unit.as_deref(), Some("°C"));
        assert_eq!(chart.series[0].points[1].x, Some(2.0));
        assert_eq!(chart.series[0].points[1].value, Some(18.0));
        assert_eq!(chart.series[1].points.len(), 2);
        assert_eq!(chart.series[1].points[1].value, Some(13.0));
        assert_eq!(chart.trend, Trend::Fluctuating);
    }

    #[test]
    fn test_axes_object_and_plain_numbers() {
        let body = json!({
            "axes": { "x": "Year", "y": { "title": "Units" } },
            "data": [5, 4, 4, 1]
        });
        let mut gaps = Gaps::default();
        let chart = normalize(&body, &mut gaps).unwrap();

        assert_eq!(chart.axes.len(), 2);
        assert_eq!(chart.axes[1].label, "Units");
        assert_eq!(chart.trend, Trend::Decreasing);
        assert_eq!(gaps.into_vec(), vec!["title"]);
    }

    #[test]
    fn test_partial_chart_reports_gaps() {
        let body = json!({ "title": "Sparse", "data": [{ "label": "A" }] });
        let mut gaps = Gaps::default();
        let chart = normalize(&body, &mut gaps).unwrap();

        assert!(chart.axes.is_empty());
        assert_eq!(chart.series[0].name, "values");
        assert_eq!(chart.series[0].points[0].value, None);
        assert_eq!(chart.trend, Trend::Unknown);
        assert_eq!(
            gaps.into_vec(),
            vec!["axes", "series[0].points[0].value", "trend"]
        );
    }

    #[test]
    fn test_completion_that_is_not_json_fails() {
        let result = normalize(&completion("I cannot read this chart."), &mut Gaps::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("Sure! {\"a\":1} Hope that helps"), "{\"a\":1}");
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_split_unit() {
        assert_eq!(split_unit("Revenue (USD)"), ("Revenue".to_string(), Some("USD".to_string())));
        assert_eq!(split_unit("Count"), ("Count".to_string(), None));
        assert_eq!(split_unit("(empty)"), ("(empty)".to_string(), None));
    }

    #[test]
    fn test_trend_of() {
        assert_eq!(trend_of(&[1.0, 2.0, 2.0, 5.0]), Trend::Increasing);
        assert_eq!(trend_of(&[3.0, 3.0]), Trend::Flat);
        assert_eq!(trend_of(&[1.0, 3.0, 2.0]), Trend::Fluctuating);
        assert_eq!(trend_of(&[7.0]), Trend::Unknown);
    }
}
