use serde::Serialize;
use serde_json::{json, Value};

use crate::catalog::SurahCatalog;
use crate::progress::compute_next_chunk;
use crate::revision::{
    as_finite_int, normalize_revision, ranges_to_batch, RangeDraft, RevisionRange,
};

/// Which field of a draft range an edit targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeField {
    Surah,
    FromAyah,
    ToAyah,
    Count,
}

impl RangeField {
    pub fn parse(name: &str) -> Option<RangeField> {
        match name {
            "surah" => Some(RangeField::Surah),
            "fromAyah" => Some(RangeField::FromAyah),
            "toAyah" => Some(RangeField::ToAyah),
            "count" => Some(RangeField::Count),
            _ => None,
        }
    }
}

/// One student's mutable state within an open lesson. `last_revision` is
/// read-only context from the student's history; `next_revision` is what this
/// lesson assigns. `suggested` counts how many `last_revision` entries the
/// auto-suggest has already consumed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub student_id: String,
    pub name: String,
    pub attended: bool,
    pub notes: String,
    pub next_revision: Vec<RangeDraft>,
    pub last_revision: Vec<RevisionRange>,
    #[serde(rename = "suggestedConsumed")]
    suggested: usize,
}

impl SessionEntry {
    /// Assemble an entry from its stored pieces: the lesson's per-student
    /// record and the most recent history row (whose `nextRevision`, or
    /// failing that `notes`, is this session's `lastRevision` basis; the
    /// lesson record's own `lastRevision`/`notes` are the fallback).
    pub fn from_stored(
        student_id: &str,
        name: &str,
        stored: &Value,
        history_last: Option<&Value>,
        catalog: Option<&SurahCatalog>,
    ) -> SessionEntry {
        let mut last_revision = Vec::new();
        if let Some(h) = history_last {
            last_revision = normalize_revision(h.get("nextRevision").unwrap_or(&Value::Null));
            if last_revision.is_empty() {
                last_revision = normalize_revision(h.get("notes").unwrap_or(&Value::Null));
            }
        }
        if last_revision.is_empty() {
            last_revision = normalize_revision(stored.get("lastRevision").unwrap_or(&Value::Null));
            if last_revision.is_empty() {
                last_revision = normalize_revision(stored.get("notes").unwrap_or(&Value::Null));
            }
        }

        let notes = stored
            .get("notes")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let stored_attended = stored
            .get("attended")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut entry = SessionEntry {
            student_id: student_id.to_string(),
            name: name.to_string(),
            attended: false,
            notes,
            next_revision: normalize_revision(stored.get("nextRevision").unwrap_or(&Value::Null))
                .iter()
                .map(RangeDraft::from_range)
                .collect(),
            last_revision,
            suggested: 0,
        };

        // No stored assignment yet: pre-seed one suggestion from the last
        // revision so the session opens with a proposal in place.
        if entry.next_revision.is_empty() && !entry.last_revision.is_empty() {
            entry.suggest_next(catalog);
            if entry.next_revision.is_empty() {
                // Catalog unavailable: at least carry the surah forward.
                let mut draft = RangeDraft::default();
                let surah = entry.last_revision[0].surah.clone();
                draft.set_surah(&surah, catalog);
                entry.next_revision.push(draft);
                entry.suggested = 1;
            }
        }

        entry.recompute_attended();
        // A teacher may have marked attendance on a prior save; never lose it
        // when the derived signal is still absent.
        entry.attended = entry.attended || stored_attended;
        entry
    }

    /// Attendance is derived, not toggled: present iff there are notes or at
    /// least one started range.
    pub fn recompute_attended(&mut self) {
        self.attended = !self.notes.trim().is_empty()
            || self.next_revision.iter().any(|d| d.marks_attendance());
    }

    pub fn edit_notes(&mut self, text: &str) {
        self.notes = text.to_string();
        self.recompute_attended();
    }

    pub fn add_range(&mut self) {
        self.next_revision.push(RangeDraft::default());
        self.recompute_attended();
    }

    /// Removing any range is allowed; zero ranges is a valid "no assignment
    /// yet" state. Out-of-range indexes are ignored.
    pub fn remove_range(&mut self, index: usize) {
        if index < self.next_revision.len() {
            self.next_revision.remove(index);
        }
        self.recompute_attended();
    }

    /// Apply one field edit to one range, re-deriving the dependent fields.
    /// Returns false only when the index or field name is unknown; malformed
    /// numeric values simply unset the field.
    pub fn edit_range(
        &mut self,
        index: usize,
        field: RangeField,
        value: &Value,
        catalog: Option<&SurahCatalog>,
    ) -> bool {
        let Some(draft) = self.next_revision.get_mut(index) else {
            return false;
        };
        match field {
            RangeField::Surah => {
                draft.set_surah(value.as_str().unwrap_or(""), catalog);
            }
            RangeField::FromAyah => draft.set_from(as_finite_int(value), catalog),
            RangeField::ToAyah => draft.set_to(as_finite_int(value), catalog),
            RangeField::Count => draft.set_count(as_finite_int(value), catalog),
        }
        self.recompute_attended();
        true
    }

    /// Append the next chunk computed from the next unconsumed `last_revision`
    /// entry. Silent no-op when everything is consumed, the catalog is
    /// missing, or progression fails.
    pub fn suggest_next(&mut self, catalog: Option<&SurahCatalog>) -> bool {
        let Some(catalog) = catalog else { return false };
        while self.suggested < self.last_revision.len() {
            let source = &self.last_revision[self.suggested];
            self.suggested += 1;
            if let Some(chunk) = compute_next_chunk(catalog, source, true) {
                self.next_revision.push(RangeDraft::from_range(&chunk));
                self.recompute_attended();
                return true;
            }
        }
        false
    }

    /// Only fully-specified ranges survive into a save.
    pub fn complete_ranges(&self) -> Vec<RevisionRange> {
        self.next_revision
            .iter()
            .filter_map(|d| d.as_complete())
            .collect()
    }

    /// The outbound per-student payload: `nextRevision` is the parallel-array
    /// batch, or null when nothing is fully specified.
    pub fn save_payload(&self) -> Value {
        let batch = ranges_to_batch(&self.complete_ranges());
        json!({
            "attended": self.attended,
            "notes": self.notes,
            "nextRevision": batch,
        })
    }

    /// Replace the draft list with what the store echoed back after a save.
    pub fn apply_saved(&mut self, saved: &Value) {
        if let Some(notes) = saved.get("notes").and_then(|v| v.as_str()) {
            self.notes = notes.to_string();
        }
        self.next_revision = normalize_revision(saved.get("nextRevision").unwrap_or(&Value::Null))
            .iter()
            .map(RangeDraft::from_range)
            .collect();
        self.recompute_attended();
    }
}

/// The in-memory ledger for one open lesson. Owned exclusively by the daemon
/// until the lesson is ended or abandoned.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSession {
    pub lesson_id: String,
    pub group_id: String,
    pub lesson_date: String,
    pub entries: Vec<SessionEntry>,
}

impl LessonSession {
    pub fn entry_mut(&mut self, student_id: &str) -> Option<&mut SessionEntry> {
        self.entries.iter_mut().find(|e| e.student_id == student_id)
    }

    pub fn entry(&self, student_id: &str) -> Option<&SessionEntry> {
        self.entries.iter().find(|e| e.student_id == student_id)
    }

    /// The full attendance batch that ends the lesson, one payload per
    /// student in roster order.
    pub fn finalize_payloads(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|e| {
                let mut payload = e.save_payload();
                payload["studentId"] = json!(e.student_id);
                payload
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_catalog;
    use serde_json::json;

    fn blank_entry() -> SessionEntry {
        SessionEntry::from_stored("s1", "أحمد", &json!({}), None, None)
    }

    #[test]
    fn open_with_no_history_has_nothing_and_is_absent() {
        let e = blank_entry();
        assert!(e.next_revision.is_empty());
        assert!(e.last_revision.is_empty());
        assert!(!e.attended);
    }

    #[test]
    fn open_normalizes_stored_batch_next_revision() {
        let stored = json!({
            "notes": "",
            "nextRevision": {
                "surah": ["A", "B"],
                "fromAyah": [1, 1],
                "toAyah": [5, 3],
                "count": [5, 3],
            }
        });
        let e = SessionEntry::from_stored("s1", "n", &stored, None, None);
        assert_eq!(e.next_revision.len(), 2);
        assert!(e.attended);
    }

    #[test]
    fn open_seeds_suggestion_from_history() {
        let cat = test_catalog();
        let history = json!({
            "nextRevision": { "surah": "Al-Baqara", "fromAyah": 3, "toAyah": 5 }
        });
        let e = SessionEntry::from_stored("s1", "n", &json!({}), Some(&history), Some(&cat));
        assert_eq!(e.last_revision.len(), 1);
        assert_eq!(e.next_revision.len(), 1);
        assert_eq!(e.next_revision[0].from_ayah, Some(5));
        assert_eq!(e.next_revision[0].to_ayah, Some(7));
        assert!(e.attended);
        // the seed consumed the history entry
        let mut e = e;
        assert!(!e.suggest_next(Some(&cat)));
    }

    #[test]
    fn open_without_catalog_carries_surah_only() {
        let history = json!({ "nextRevision": { "surah": "البقرة", "fromAyah": 3, "toAyah": 5 } });
        let e = SessionEntry::from_stored("s1", "n", &json!({}), Some(&history), None);
        assert_eq!(e.next_revision.len(), 1);
        assert_eq!(e.next_revision[0].surah, "البقرة");
        assert_eq!(e.next_revision[0].from_ayah, None);
        // surah alone (no from ayah) does not prove attendance
        assert!(!e.attended);
    }

    #[test]
    fn open_falls_back_to_history_notes_text() {
        let history = json!({ "notes": "سورة النصر 1-3" });
        let e = SessionEntry::from_stored("s1", "n", &json!({}), Some(&history), None);
        assert_eq!(e.last_revision, vec![RevisionRange::new("النصر", 1, 3)]);
    }

    #[test]
    fn stored_attended_flag_is_preserved() {
        let e = SessionEntry::from_stored("s1", "n", &json!({ "attended": true }), None, None);
        assert!(e.attended);
    }

    #[test]
    fn notes_drive_attendance() {
        let mut e = blank_entry();
        e.edit_notes("حفظ جيد");
        assert!(e.attended);
        e.edit_notes("   ");
        assert!(!e.attended);
    }

    #[test]
    fn empty_placeholder_range_does_not_mark_attendance() {
        let mut e = blank_entry();
        e.add_range();
        assert!(!e.attended);
        e.edit_range(0, RangeField::Surah, &json!("Al-Baqara"), None);
        assert!(!e.attended);
        e.edit_range(0, RangeField::FromAyah, &json!(1), None);
        assert!(e.attended);
    }

    #[test]
    fn removing_ranges_down_to_zero_is_allowed() {
        let mut e = blank_entry();
        e.add_range();
        e.edit_range(0, RangeField::Surah, &json!("A"), None);
        e.edit_range(0, RangeField::FromAyah, &json!(1), None);
        e.remove_range(0);
        assert!(e.next_revision.is_empty());
        assert!(!e.attended);
        // out-of-range removal is a no-op
        e.remove_range(5);
    }

    #[test]
    fn malformed_numeric_edit_unsets_the_field() {
        let mut e = blank_entry();
        e.add_range();
        e.edit_range(0, RangeField::FromAyah, &json!(3), None);
        e.edit_range(0, RangeField::ToAyah, &json!(7), None);
        assert_eq!(e.next_revision[0].count, Some(5));
        e.edit_range(0, RangeField::FromAyah, &json!("xyz"), None);
        assert_eq!(e.next_revision[0].from_ayah, None);
        // count keeps its last derived value, recomputation is skipped
        assert_eq!(e.next_revision[0].count, Some(5));
    }

    #[test]
    fn edit_out_of_range_index_is_rejected() {
        let mut e = blank_entry();
        assert!(!e.edit_range(0, RangeField::Surah, &json!("A"), None));
    }

    #[test]
    fn suggest_consumes_last_revision_in_order_then_stops() {
        let cat = test_catalog();
        let history = json!({
            "nextRevision": {
                "surah": ["Al-Faatiha", "Al-Baqara"],
                "fromAyah": [1, 10],
                "toAyah": [3, 12],
                "count": [3, 3],
            }
        });
        let mut e = SessionEntry::from_stored("s1", "n", &json!({}), Some(&history), Some(&cat));
        // opening already consumed Al-Faatiha 1-3 -> seeded 3-5
        assert_eq!(e.next_revision.len(), 1);
        assert_eq!(e.next_revision[0].from_ayah, Some(3));

        assert!(e.suggest_next(Some(&cat)));
        assert_eq!(e.next_revision.len(), 2);
        assert_eq!(e.next_revision[1].from_ayah, Some(12));
        assert_eq!(e.next_revision[1].to_ayah, Some(14));

        // both consumed: further suggestions are no-ops
        assert!(!e.suggest_next(Some(&cat)));
        assert_eq!(e.next_revision.len(), 2);
    }

    #[test]
    fn suggest_without_catalog_is_a_no_op() {
        let history = json!({ "nextRevision": { "surah": "x", "fromAyah": 1, "toAyah": 2 } });
        let mut e = SessionEntry::from_stored("s1", "n", &json!({}), Some(&history), None);
        let before = e.next_revision.len();
        assert!(!e.suggest_next(None));
        assert_eq!(e.next_revision.len(), before);
    }

    #[test]
    fn skips_unresolvable_sources_and_consumes_them() {
        let cat = test_catalog();
        let history = json!({
            "nextRevision": {
                "surah": ["no such surah", "Al-Baqara"],
                "fromAyah": [1, 1],
                "toAyah": [2, 3],
                "count": [2, 3],
            }
        });
        let mut e = SessionEntry::from_stored("s1", "n", &json!({}), Some(&history), Some(&cat));
        // the seed skipped the bad source and used Al-Baqara 1-3
        assert_eq!(e.next_revision.len(), 1);
        assert_eq!(e.next_revision[0].from_ayah, Some(3));
        assert!(!e.suggest_next(Some(&cat)));
    }

    #[test]
    fn save_payload_filters_partial_drafts() {
        let mut e = blank_entry();
        e.add_range();
        e.edit_range(0, RangeField::Surah, &json!("A"), None);
        e.edit_range(0, RangeField::FromAyah, &json!(1), None);
        e.edit_range(0, RangeField::ToAyah, &json!(5), None);
        e.add_range();
        e.edit_range(1, RangeField::Surah, &json!("B"), None); // no ayat yet

        let payload = e.save_payload();
        assert_eq!(payload["attended"], json!(true));
        let batch = &payload["nextRevision"];
        assert_eq!(batch["surah"], json!(["A"]));
        assert_eq!(batch["fromAyah"], json!([1]));
        assert_eq!(batch["toAyah"], json!([5]));
        assert_eq!(batch["count"], json!([5]));
    }

    #[test]
    fn save_payload_is_null_when_nothing_is_complete() {
        let mut e = blank_entry();
        e.add_range();
        e.edit_range(0, RangeField::Surah, &json!("A"), None);
        let payload = e.save_payload();
        assert!(payload["nextRevision"].is_null());
    }

    #[test]
    fn apply_saved_round_trips_through_the_normalizer() {
        let mut e = blank_entry();
        e.add_range();
        e.edit_range(0, RangeField::Surah, &json!("A"), None);
        e.edit_range(0, RangeField::FromAyah, &json!(1), None);
        e.edit_range(0, RangeField::ToAyah, &json!(5), None);
        e.add_range(); // partial draft, dropped by the echo

        let payload = e.save_payload();
        e.apply_saved(&payload);
        assert_eq!(e.next_revision.len(), 1);
        assert_eq!(e.next_revision[0].as_complete(), Some(RevisionRange::new("A", 1, 5)));
        assert!(e.attended);
    }

    #[test]
    fn finalize_collects_one_payload_per_student() {
        let session = LessonSession {
            lesson_id: "l1".to_string(),
            group_id: "g1".to_string(),
            lesson_date: "2025-09-14".to_string(),
            entries: vec![blank_entry(), {
                let mut e = SessionEntry::from_stored("s2", "ب", &json!({}), None, None);
                e.edit_notes("غاب عن التسميع");
                e
            }],
        };
        let payloads = session.finalize_payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["studentId"], json!("s1"));
        assert_eq!(payloads[0]["attended"], json!(false));
        assert_eq!(payloads[1]["studentId"], json!("s2"));
        assert_eq!(payloads[1]["attended"], json!(true));
    }
}
