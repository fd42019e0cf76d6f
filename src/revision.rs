use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::catalog::SurahCatalog;

/// A fully-specified contiguous span of ayat within one surah. `count` is
/// always derived from `from_ayah`/`to_ayah`; it is stored only because the
/// wire batches carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRange {
    pub surah: String,
    pub from_ayah: i64,
    pub to_ayah: i64,
    pub count: i64,
}

impl RevisionRange {
    pub fn new(surah: impl Into<String>, from_ayah: i64, to_ayah: i64) -> Self {
        RevisionRange {
            surah: surah.into(),
            from_ayah,
            to_ayah,
            count: span_len(from_ayah, to_ayah),
        }
    }
}

/// Inclusive span length, saturating instead of overflowing on absurd bounds.
pub(crate) fn span_len(from: i64, to: i64) -> i64 {
    to.saturating_sub(from).saturating_add(1)
}

/// End ayah of a `count`-long span starting at `from`, or `None` when the
/// arithmetic overflows; the end then stays unset like any malformed input.
fn span_end(from: i64, count: i64) -> Option<i64> {
    from.checked_add(count).and_then(|v| v.checked_sub(1))
}

/// A range mid-edit. Any field may still be unset; `exceeds` is the advisory
/// boundary flag and never blocks anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeDraft {
    pub surah: String,
    pub from_ayah: Option<i64>,
    pub to_ayah: Option<i64>,
    pub count: Option<i64>,
    #[serde(default)]
    pub exceeds: bool,
}

impl RangeDraft {
    pub fn from_range(r: &RevisionRange) -> Self {
        RangeDraft {
            surah: r.surah.clone(),
            from_ayah: Some(r.from_ayah),
            to_ayah: Some(r.to_ayah),
            count: Some(r.count),
            exceeds: false,
        }
    }

    /// The draft counts toward attendance once it names a surah and has a
    /// starting ayah.
    pub fn marks_attendance(&self) -> bool {
        !self.surah.trim().is_empty() && self.from_ayah.is_some()
    }

    pub fn as_complete(&self) -> Option<RevisionRange> {
        if self.surah.trim().is_empty() {
            return None;
        }
        let (from, to) = (self.from_ayah?, self.to_ayah?);
        Some(RevisionRange::new(self.surah.trim(), from, to))
    }

    /// Every edit funnels through one of the setters below so `count`,
    /// `to_ayah` and the boundary flag can never drift apart (the same
    /// reconciliation regardless of which field the user touched).
    pub fn set_surah(&mut self, name: &str, catalog: Option<&SurahCatalog>) {
        self.surah = name.trim().to_string();
        if let Some(s) = catalog.and_then(|c| c.lookup(&self.surah)) {
            let max = s.ayah_count as i64;
            if let Some(to) = self.to_ayah {
                if to > max {
                    self.to_ayah = Some(max);
                }
            }
            if let Some(from) = self.from_ayah {
                if from > max {
                    self.from_ayah = Some(max);
                }
            }
        }
        self.recount();
        self.refresh_exceeds(catalog);
    }

    pub fn set_from(&mut self, value: Option<i64>, catalog: Option<&SurahCatalog>) {
        self.from_ayah = value;
        if let (Some(from), Some(count)) = (self.from_ayah, self.count) {
            self.to_ayah = span_end(from, count);
        } else if let (Some(from), Some(to)) = (self.from_ayah, self.to_ayah) {
            if to < from {
                self.to_ayah = Some(from);
            }
        }
        self.recount();
        self.refresh_exceeds(catalog);
    }

    pub fn set_count(&mut self, value: Option<i64>, catalog: Option<&SurahCatalog>) {
        self.count = value;
        if let Some(count) = self.count {
            // from_ayah stays unset if the user never typed it; 1 is only the
            // default basis for the computed end.
            let from = self.from_ayah.unwrap_or(1);
            self.to_ayah = span_end(from, count);
        }
        self.recount();
        self.refresh_exceeds(catalog);
    }

    pub fn set_to(&mut self, value: Option<i64>, catalog: Option<&SurahCatalog>) {
        self.to_ayah = value;
        self.recount();
        self.refresh_exceeds(catalog);
    }

    fn recount(&mut self) {
        if let (Some(from), Some(to)) = (self.from_ayah, self.to_ayah) {
            self.count = Some(span_len(from, to));
        }
    }

    fn refresh_exceeds(&mut self, catalog: Option<&SurahCatalog>) {
        let resolved = catalog.and_then(|c| c.lookup(&self.surah));
        self.exceeds = match (resolved, self.to_ayah) {
            (Some(s), Some(to)) => to > s.ayah_count as i64,
            _ => false,
        };
    }
}

/// No real ayah position comes anywhere near this; anything beyond it is
/// garbage input and treated as unset, which also keeps the derived-field
/// arithmetic far away from i64 overflow.
const AYAH_BOUND: i64 = 1_000_000;

/// Coerce a JSON value into a finite integer the way the legacy clients did:
/// numbers pass through, numeric strings are parsed, everything else is
/// treated as unset. Magnitudes beyond `AYAH_BOUND` are unset too.
pub fn as_finite_int(v: &Value) -> Option<i64> {
    let n = match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    if !(-AYAH_BOUND..=AYAH_BOUND).contains(&n) {
        return None;
    }
    Some(n)
}

fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(k).filter(|v| !v.is_null()))
}

/// Parse a legacy free-text revision, e.g. "سورة البقرة 1-5".
/// Needs two integers separated by a dash-like character and a non-numeric
/// name token; the "سورة" marker word is stripped if present.
fn parse_revision_string(text: &str) -> Option<RevisionRange> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut span: Option<(usize, usize, i64, i64)> = None;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let from: i64 = chars[start..i].iter().collect::<String>().parse().ok()?;
        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j >= chars.len() || !matches!(chars[j], '-' | '\u{2013}' | '\u{2014}') {
            continue;
        }
        j += 1;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        let num_start = j;
        while j < chars.len() && chars[j].is_ascii_digit() {
            j += 1;
        }
        if j == num_start {
            continue;
        }
        let to: i64 = chars[num_start..j].iter().collect::<String>().parse().ok()?;
        if from > AYAH_BOUND || to > AYAH_BOUND {
            continue;
        }
        span = Some((start, j, from, to));
        break;
    }

    let (start, end, from, to) = span?;
    let mut name: String = chars[..start].iter().chain(chars[end..].iter()).collect();
    name = name.replace("سورة", " ");
    let name = name
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '\u{2013}' | '\u{2014}'))
        .to_string();
    if name.is_empty() {
        return None;
    }
    Some(RevisionRange::new(name, from, to))
}

fn normalize_single_object(obj: &Value) -> Option<RevisionRange> {
    let surah = field(obj, &["surah", "sura", "name"])
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let from = field(obj, &["fromAyah", "from", "start"]).and_then(as_finite_int)?;
    let to = field(obj, &["toAyah", "to", "end"]).and_then(as_finite_int)?;
    Some(RevisionRange::new(surah, from, to))
}

fn normalize_batch_object(obj: &Value) -> Vec<RevisionRange> {
    let surahs = match obj.get("surah").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    let froms = obj.get("fromAyah").and_then(|v| v.as_array());
    let tos = obj.get("toAyah").and_then(|v| v.as_array());
    let counts = obj.get("count").and_then(|v| v.as_array());
    let (froms, tos, counts) = match (froms, tos, counts) {
        (Some(f), Some(t), Some(c)) => (f, t, c),
        _ => return Vec::new(),
    };
    if froms.len() != surahs.len() || tos.len() != surahs.len() || counts.len() != surahs.len() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for i in 0..surahs.len() {
        let surah = surahs[i].as_str().map(str::trim).unwrap_or("");
        let from = as_finite_int(&froms[i]);
        let to = as_finite_int(&tos[i]);
        if let (false, Some(from), Some(to)) = (surah.is_empty(), from, to) {
            out.push(RevisionRange::new(surah, from, to));
        }
    }
    out
}

/// Collapse every historical representation of "what to revise next" into a
/// canonical ordered range list. Pure; unrecognized input yields an empty
/// list, never an error.
pub fn normalize_revision(value: &Value) -> Vec<RevisionRange> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => parse_revision_string(s).into_iter().collect(),
        Value::Array(items) => items.iter().flat_map(normalize_revision).collect(),
        Value::Object(_) => {
            if value.get("surah").map(|v| v.is_array()).unwrap_or(false) {
                normalize_batch_object(value)
            } else {
                normalize_single_object(value).into_iter().collect()
            }
        }
        _ => Vec::new(),
    }
}

/// Serialize ranges into the parallel-array batch the store keeps (and the
/// normalizer reads back). `None` for an empty list, so an empty assignment
/// is stored as `nextRevision: null` rather than four empty arrays.
pub fn ranges_to_batch(ranges: &[RevisionRange]) -> Option<Value> {
    if ranges.is_empty() {
        return None;
    }
    Some(json!({
        "surah": ranges.iter().map(|r| r.surah.clone()).collect::<Vec<_>>(),
        "fromAyah": ranges.iter().map(|r| r.from_ayah).collect::<Vec<_>>(),
        "toAyah": ranges.iter().map(|r| r.to_ayah).collect::<Vec<_>>(),
        "count": ranges.iter().map(|r| span_len(r.from_ayah, r.to_ayah)).collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_catalog;
    use serde_json::json;

    #[test]
    fn normalize_structured_single_range_with_alternate_keys() {
        let v = json!({ "sura": "Al-Baqara", "from": 3, "end": "7" });
        let out = normalize_revision(&v);
        assert_eq!(out, vec![RevisionRange::new("Al-Baqara", 3, 7)]);
        assert_eq!(out[0].count, 5);
    }

    #[test]
    fn normalize_single_range_requires_finite_numbers() {
        let v = json!({ "surah": "Al-Baqara", "fromAyah": "three", "toAyah": 7 });
        assert!(normalize_revision(&v).is_empty());
        let v = json!({ "surah": "", "fromAyah": 1, "toAyah": 7 });
        assert!(normalize_revision(&v).is_empty());
    }

    #[test]
    fn normalize_batch_object() {
        let v = json!({
            "surah": ["A", "B"],
            "fromAyah": [1, 1],
            "toAyah": [5, 3],
            "count": [5, 3],
        });
        let out = normalize_revision(&v);
        assert_eq!(
            out,
            vec![RevisionRange::new("A", 1, 5), RevisionRange::new("B", 1, 3)]
        );
    }

    #[test]
    fn normalize_batch_drops_malformed_rows_keeps_rest() {
        // Empty surah and non-numeric from are row-local problems; the
        // well-formed rows still come through.
        let v = json!({
            "surah": ["A", "", "C"],
            "fromAyah": [1, 2, "x"],
            "toAyah": [5, 4, 9],
            "count": [5, 3, 0],
        });
        assert_eq!(normalize_revision(&v), vec![RevisionRange::new("A", 1, 5)]);
    }

    #[test]
    fn normalize_batch_rejects_mismatched_lengths() {
        let v = json!({
            "surah": ["A", "B"],
            "fromAyah": [1],
            "toAyah": [5, 3],
            "count": [5, 3],
        });
        assert!(normalize_revision(&v).is_empty());
    }

    #[test]
    fn normalize_free_text_string() {
        let out = normalize_revision(&json!("سورة البقرة 10-15"));
        assert_eq!(out, vec![RevisionRange::new("البقرة", 10, 15)]);

        // en-dash with spacing
        let out = normalize_revision(&json!("النصر 1 – 3"));
        assert_eq!(out, vec![RevisionRange::new("النصر", 1, 3)]);
    }

    #[test]
    fn normalize_string_without_numbers_is_empty() {
        assert!(normalize_revision(&json!("سورة البقرة")).is_empty());
        assert!(normalize_revision(&json!("")).is_empty());
        assert!(normalize_revision(&json!("10-")).is_empty());
    }

    #[test]
    fn normalize_absent_or_unrecognized_is_empty() {
        assert!(normalize_revision(&Value::Null).is_empty());
        assert!(normalize_revision(&json!(7)).is_empty());
        assert!(normalize_revision(&json!(true)).is_empty());
    }

    #[test]
    fn normalize_is_idempotent_over_canonical_lists() {
        let ranges = vec![
            RevisionRange::new("A", 1, 5),
            RevisionRange::new("B", 2, 2),
        ];
        let as_json = serde_json::to_value(&ranges).unwrap();
        let once = normalize_revision(&as_json);
        assert_eq!(once, ranges);
        let twice = normalize_revision(&serde_json::to_value(&once).unwrap());
        assert_eq!(twice, ranges);
    }

    #[test]
    fn batch_round_trip() {
        let ranges = vec![
            RevisionRange::new("A", 1, 5),
            RevisionRange::new("B", 1, 3),
        ];
        let batch = ranges_to_batch(&ranges).expect("batch");
        assert_eq!(normalize_revision(&batch), ranges);
        assert!(ranges_to_batch(&[]).is_none());
    }

    #[test]
    fn draft_edit_from_recomputes_to_from_count() {
        let cat = test_catalog();
        let mut d = RangeDraft::default();
        d.set_surah("Al-Baqara", Some(&cat));
        d.set_count(Some(5), Some(&cat));
        d.set_from(Some(10), Some(&cat));
        assert_eq!(d.to_ayah, Some(14));
        assert_eq!(d.count, Some(5));
        assert!(!d.exceeds);
    }

    #[test]
    fn draft_edit_from_repairs_inverted_to() {
        let mut d = RangeDraft::default();
        d.set_to(Some(3), None);
        d.set_from(Some(8), None);
        assert_eq!(d.to_ayah, Some(8));
        assert_eq!(d.count, Some(1));
    }

    #[test]
    fn draft_count_defaults_from_basis_to_one() {
        let mut d = RangeDraft::default();
        d.set_count(Some(4), None);
        assert_eq!(d.to_ayah, Some(4));
        // from stays unset until the user provides it
        assert_eq!(d.from_ayah, None);
        assert_eq!(d.count, Some(4));
    }

    #[test]
    fn draft_surah_change_clamps_to_new_maximum() {
        let cat = test_catalog();
        let mut d = RangeDraft::default();
        d.set_from(Some(20), Some(&cat));
        d.set_to(Some(40), Some(&cat));
        d.set_surah("Al-Faatiha", Some(&cat)); // 7 ayat
        assert_eq!(d.from_ayah, Some(7));
        assert_eq!(d.to_ayah, Some(7));
        assert_eq!(d.count, Some(1));
        assert!(!d.exceeds);
    }

    #[test]
    fn draft_exceeds_is_advisory_only() {
        let cat = test_catalog();
        let mut d = RangeDraft::default();
        d.set_surah("Al-Faatiha", Some(&cat));
        d.set_from(Some(5), Some(&cat));
        d.set_to(Some(9), Some(&cat));
        assert!(d.exceeds);
        // still fully specified and saveable
        assert_eq!(d.as_complete(), Some(RevisionRange::new("Al-Faatiha", 5, 9)));
    }

    #[test]
    fn derived_fields_stay_consistent_after_any_edit() {
        let cat = test_catalog();
        let mut d = RangeDraft::default();
        d.set_surah("Al-Baqara", Some(&cat));
        for step in 0..4 {
            match step {
                0 => d.set_from(Some(5), Some(&cat)),
                1 => d.set_to(Some(12), Some(&cat)),
                2 => d.set_count(Some(3), Some(&cat)),
                _ => d.set_from(Some(2), Some(&cat)),
            }
            if let (Some(f), Some(t), Some(c)) = (d.from_ayah, d.to_ayah, d.count) {
                assert_eq!(t - f + 1, c, "after step {}", step);
            }
        }
    }

    #[test]
    fn malformed_numeric_input_is_treated_as_unset() {
        assert_eq!(as_finite_int(&json!("12")), Some(12));
        assert_eq!(as_finite_int(&json!(" 7 ")), Some(7));
        assert_eq!(as_finite_int(&json!("abc")), None);
        assert_eq!(as_finite_int(&Value::Null), None);
        assert_eq!(as_finite_int(&json!([1])), None);
    }

    #[test]
    fn absurd_magnitudes_are_treated_as_unset() {
        assert_eq!(as_finite_int(&json!(i64::MAX)), None);
        assert_eq!(as_finite_int(&json!(i64::MIN)), None);
        assert_eq!(as_finite_int(&json!(9.2e18)), None);
        assert_eq!(as_finite_int(&json!(-9.2e18)), None);
        assert_eq!(as_finite_int(&json!("99999999999999999999")), None);
        assert_eq!(as_finite_int(&json!(286)), Some(286));
    }

    #[test]
    fn normalize_rejects_out_of_range_ayah_numbers() {
        let v = json!({ "surah": "A", "fromAyah": -9.2e18, "toAyah": 9.2e18 });
        assert!(normalize_revision(&v).is_empty());
        assert!(normalize_revision(&json!("النصر 99999999999999999999-3")).is_empty());
        assert!(normalize_revision(&json!("النصر 2000000-2000005")).is_empty());
    }

    #[test]
    fn draft_edits_survive_extreme_values_without_derailing() {
        let mut d = RangeDraft::default();
        d.set_from(Some(2), None);
        d.set_count(Some(i64::MAX), None);
        // The end cannot be derived; it stays unset instead of wrapping.
        assert_eq!(d.to_ayah, None);
        assert_eq!(d.from_ayah, Some(2));

        let mut d = RangeDraft::default();
        d.set_from(Some(i64::MIN), None);
        d.set_to(Some(i64::MAX), None);
        assert_eq!(d.count, Some(i64::MAX));
    }
}
