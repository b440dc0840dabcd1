//! Grouped usage statistics.
//!
//! Records are folded into one accumulator per grouping key, then finalized
//! into count/sum/mean figures. Null handling is the same for every table:
//! sums and means skip missing values, a sum over nothing is 0, and a mean
//! over nothing is `null`.

use crate::extract::UsageRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Dimension a [`SummaryTable`] is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupBy {
    ModelId,
    UserId,
    /// UTC calendar date of the invocation timestamp.
    Date,
}

impl GroupBy {
    fn key(self, r: &UsageRecord) -> Option<String> {
        match self {
            GroupBy::ModelId => r.model_id.clone(),
            GroupBy::UserId => r.user_id.clone(),
            GroupBy::Date => r
                .timestamp
                .map(|ts| ts.date_naive().format("%Y-%m-%d").to_string()),
        }
    }

    /// Per-user and per-day tables also list the models seen in each group.
    fn tracks_models(self) -> bool {
        matches!(self, GroupBy::UserId | GroupBy::Date)
    }
}

/// `inputTokens` statistics: non-null count, sum, mean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountedStats {
    pub count: u64,
    pub sum: u64,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub sum: u64,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    /// Grouping key; `None` collects records missing the key field.
    pub key: Option<String>,
    pub input_tokens: CountedStats,
    pub completion_tokens: Stats,
    pub total_tokens: Stats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryTable {
    pub group_by: GroupBy,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn empty(group_by: GroupBy) -> Self {
        Self {
            group_by,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, key: Option<&str>) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.key.as_deref() == key)
    }
}

/// Running sum over the non-null values of one field.
#[derive(Debug, Default)]
struct FieldAcc {
    count: u64,
    sum: u64,
}

impl FieldAcc {
    fn add(&mut self, value: Option<u64>) {
        if let Some(v) = value {
            self.count += 1;
            self.sum = self.sum.saturating_add(v);
        }
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(round2(self.sum as f64 / self.count as f64))
    }

    fn stats(&self) -> Stats {
        Stats {
            sum: self.sum,
            mean: self.mean(),
        }
    }

    fn counted(&self) -> CountedStats {
        CountedStats {
            count: self.count,
            sum: self.sum,
            mean: self.mean(),
        }
    }
}

#[derive(Debug, Default)]
struct GroupAcc {
    input: FieldAcc,
    completion: FieldAcc,
    total: FieldAcc,
    models: BTreeSet<String>,
}

/// Group `records` by `group_by` and compute per-group statistics.
///
/// Rows are ordered by key, with the null group first.
pub fn aggregate(records: &[UsageRecord], group_by: GroupBy) -> SummaryTable {
    if records.is_empty() {
        return SummaryTable::empty(group_by);
    }

    let mut groups: BTreeMap<Option<String>, GroupAcc> = BTreeMap::new();
    for r in records {
        let acc = groups.entry(group_by.key(r)).or_default();
        acc.input.add(r.input_tokens);
        acc.completion.add(r.completion_tokens);
        acc.total.add(Some(r.total_tokens));
        if let Some(model) = &r.model_id {
            acc.models.insert(model.clone());
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, acc)| SummaryRow {
            key,
            input_tokens: acc.input.counted(),
            completion_tokens: acc.completion.stats(),
            total_tokens: acc.total.stats(),
            model_ids: group_by
                .tracks_models()
                .then(|| acc.models.into_iter().collect()),
        })
        .collect();

    SummaryTable { group_by, rows }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(model: Option<&str>, user: Option<&str>, input: Option<u64>, output: Option<u64>) -> UsageRecord {
        UsageRecord {
            timestamp: None,
            region: Some("us-east-1".into()),
            model_id: model.map(str::to_string),
            user_id: user.map(str::to_string),
            input_tokens: input,
            completion_tokens: output,
            total_tokens: input.unwrap_or(0) + output.unwrap_or(0),
            prompt: String::new(),
        }
    }

    fn at(mut r: UsageRecord, y: i32, m: u32, d: u32, h: u32) -> UsageRecord {
        r.timestamp = Some(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap());
        r
    }

    #[test]
    fn empty_input_is_explicitly_empty() {
        for g in [GroupBy::ModelId, GroupBy::UserId, GroupBy::Date] {
            let t = aggregate(&[], g);
            assert!(t.is_empty());
            assert_eq!(t.group_by, g);
        }
    }

    #[test]
    fn per_model_scenario() {
        let records = vec![
            record(Some("m1"), None, Some(10), Some(5)),
            record(Some("m1"), None, Some(20), Some(0)),
        ];
        let t = aggregate(&records, GroupBy::ModelId);
        assert_eq!(t.rows.len(), 1);
        let row = t.row(Some("m1")).unwrap();
        assert_eq!(row.input_tokens.count, 2);
        assert_eq!(row.input_tokens.sum, 30);
        assert_eq!(row.input_tokens.mean, Some(15.0));
        assert_eq!(row.completion_tokens.sum, 5);
        assert_eq!(row.completion_tokens.mean, Some(2.5));
        assert_eq!(row.total_tokens.sum, 35);
        assert_eq!(row.total_tokens.mean, Some(17.5));
        assert_eq!(row.model_ids, None);
    }

    #[test]
    fn means_round_to_two_places() {
        let records = vec![
            record(Some("m"), None, Some(1), Some(1)),
            record(Some("m"), None, Some(1), Some(1)),
            record(Some("m"), None, Some(2), Some(0)),
        ];
        let row = aggregate(&records, GroupBy::ModelId).rows.remove(0);
        assert_eq!(row.input_tokens.mean, Some(1.33));
        assert_eq!(row.completion_tokens.mean, Some(0.67));
    }

    #[test]
    fn null_values_are_skipped_and_empty_mean_is_none() {
        let records = vec![
            record(Some("m"), None, None, Some(4)),
            record(Some("m"), None, None, None),
        ];
        let row = aggregate(&records, GroupBy::ModelId).rows.remove(0);
        assert_eq!(row.input_tokens.count, 0);
        assert_eq!(row.input_tokens.sum, 0);
        assert_eq!(row.input_tokens.mean, None);
        assert_eq!(row.completion_tokens.sum, 4);
        assert_eq!(row.completion_tokens.mean, Some(4.0));
        assert_eq!(row.total_tokens.sum, 4);
        assert_eq!(row.total_tokens.mean, Some(2.0));
    }

    #[test]
    fn missing_key_forms_null_group_first() {
        let records = vec![
            record(Some("b"), None, Some(1), None),
            record(None, None, Some(2), None),
            record(Some("a"), None, Some(3), None),
        ];
        let t = aggregate(&records, GroupBy::ModelId);
        let keys: Vec<_> = t.rows.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![None, Some("a".into()), Some("b".into())]);
        assert_eq!(t.row(None).unwrap().input_tokens.sum, 2);
    }

    #[test]
    fn per_user_lists_distinct_models() {
        let records = vec![
            record(Some("m2"), Some("alice"), Some(1), Some(1)),
            record(Some("m1"), Some("alice"), Some(1), Some(1)),
            record(Some("m2"), Some("alice"), Some(1), Some(1)),
            record(None, Some("alice"), Some(1), Some(1)),
            record(Some("m3"), Some("bob"), Some(5), None),
        ];
        let t = aggregate(&records, GroupBy::UserId);
        let alice = t.row(Some("alice")).unwrap();
        assert_eq!(alice.input_tokens.count, 4);
        assert_eq!(
            alice.model_ids.as_deref(),
            Some(&["m1".to_string(), "m2".to_string()][..])
        );
        let bob = t.row(Some("bob")).unwrap();
        assert_eq!(bob.model_ids.as_deref(), Some(&["m3".to_string()][..]));
    }

    #[test]
    fn per_day_uses_calendar_date() {
        let records = vec![
            at(record(Some("m1"), None, Some(10), Some(1)), 2024, 5, 1, 0),
            at(record(Some("m2"), None, Some(20), Some(2)), 2024, 5, 1, 23),
            at(record(Some("m1"), None, Some(30), Some(3)), 2024, 5, 2, 12),
            record(Some("m1"), None, Some(40), Some(4)),
        ];
        let t = aggregate(&records, GroupBy::Date);
        assert_eq!(t.rows.len(), 3);
        let may1 = t.row(Some("2024-05-01")).unwrap();
        assert_eq!(may1.input_tokens.sum, 30);
        assert_eq!(may1.total_tokens.sum, 33);
        assert_eq!(may1.model_ids.as_ref().unwrap().len(), 2);
        assert_eq!(t.row(Some("2024-05-02")).unwrap().input_tokens.count, 1);
        assert_eq!(t.row(None).unwrap().input_tokens.sum, 40);
    }

    #[test]
    fn group_sums_match_record_sums() {
        let records: Vec<_> = (0..20u64)
            .map(|i| {
                let model = ["x", "y", "z"][(i % 3) as usize];
                let input = (i % 4 != 0).then_some(i * 7);
                record(Some(model), None, input, Some(i))
            })
            .collect();
        let t = aggregate(&records, GroupBy::ModelId);
        for row in &t.rows {
            let members: Vec<_> = records
                .iter()
                .filter(|r| r.model_id == row.key)
                .collect();
            let sum: u64 = members.iter().filter_map(|r| r.input_tokens).sum();
            let count = members.iter().filter(|r| r.input_tokens.is_some()).count() as u64;
            assert_eq!(row.input_tokens.sum, sum);
            assert_eq!(row.input_tokens.count, count);
        }
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let t = aggregate(
            &[record(Some("m"), Some("u"), Some(1), None)],
            GroupBy::UserId,
        );
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["groupBy"], "userId");
        assert_eq!(v["rows"][0]["key"], "u");
        assert_eq!(v["rows"][0]["inputTokens"]["count"], 1);
        assert!(v["rows"][0]["completionTokens"]["mean"].is_null());
        assert_eq!(v["rows"][0]["modelIds"][0], "m");
    }
}
