//! Row filtering and sorting for combined views

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::fields::{field, FieldMap, FieldValue};
use crate::reconcile::IdentityFields;

/// Keep rows whose `column` equals one of `values` (case-insensitive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub values: Vec<String>,
}

impl RowFilter {
    pub fn new(column: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `column:value1|value2`
    ///
    /// ```
    /// use roster_common::view::RowFilter;
    ///
    /// let f = RowFilter::parse("Grade:9|10").unwrap();
    /// assert_eq!(f.column, "Grade");
    /// assert_eq!(f.values, vec!["9", "10"]);
    /// assert!(RowFilter::parse("no separator").is_none());
    /// ```
    pub fn parse(clause: &str) -> Option<Self> {
        let (column, values) = clause.split_once(':')?;
        let column = column.trim();
        if column.is_empty() {
            return None;
        }
        Some(Self::new(column, values.split('|').map(str::trim)))
    }

    pub fn matches(&self, row: &FieldMap) -> bool {
        let value = field(row, &self.column)
            .to_plain_string()
            .unwrap_or_default()
            .to_lowercase();
        self.values.iter().any(|v| v.to_lowercase() == value)
    }
}

/// Apply every filter (AND); an empty filter list keeps everything
pub fn filter_rows(rows: Vec<FieldMap>, filters: &[RowFilter]) -> Vec<FieldMap> {
    if filters.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| filters.iter().all(|f| f.matches(row)))
        .collect()
}

/// Case-insensitive substring match of `term` against the first name,
/// the last name, or "first last". A blank term matches every row.
pub fn matches_name_search(row: &FieldMap, term: &str, identity: &IdentityFields) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    let first = field(row, &identity.first_column)
        .to_plain_string()
        .unwrap_or_default()
        .to_lowercase();
    let last = field(row, &identity.last_column)
        .to_plain_string()
        .unwrap_or_default()
        .to_lowercase();
    first.contains(&term) || last.contains(&term) || format!("{} {}", first, last).contains(&term)
}

/// Keep rows whose student name contains `term`
pub fn search_rows(rows: Vec<FieldMap>, term: &str, identity: &IdentityFields) -> Vec<FieldMap> {
    if term.trim().is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| matches_name_search(row, term, identity))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse `column` or `column:asc` / `column:desc`
    pub fn parse(clause: &str) -> Option<Self> {
        let (column, direction) = match clause.rsplit_once(':') {
            Some((column, "desc")) => (column, SortDirection::Desc),
            Some((column, "asc")) => (column, SortDirection::Asc),
            _ => (clause, SortDirection::Asc),
        };
        let column = column.trim();
        if column.is_empty() {
            return None;
        }
        Some(Self {
            column: column.to_string(),
            direction,
        })
    }
}

/// Compare two cell values: numerically when both parse as numbers,
/// otherwise as strings (`Null` sorts as `""`). Numbers order before
/// non-numbers so the ordering stays total on mixed columns.
pub fn compare_values(a: &FieldValue, b: &FieldValue) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => {
            let x = a.to_plain_string().unwrap_or_default();
            let y = b.to_plain_string().unwrap_or_default();
            x.cmp(&y)
        }
    }
}

/// Stable multi-key sort
pub fn sort_rows(rows: &mut [FieldMap], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in keys {
            let ordering = compare_values(field(a, &key.column), field(b, &key.column));
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::field_map;

    fn names(rows: &[FieldMap]) -> Vec<String> {
        rows.iter()
            .map(|r| field(r, "Name").to_plain_string().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_filters_are_case_insensitive_and_anded() {
        let rows = vec![
            field_map([("Name", "A"), ("Part", "Alto"), ("Grade", "9")]),
            field_map([("Name", "B"), ("Part", "alto"), ("Grade", "10")]),
            field_map([("Name", "C"), ("Part", "Tenor"), ("Grade", "9")]),
        ];
        let kept = filter_rows(
            rows,
            &[RowFilter::new("Part", ["ALTO"]), RowFilter::new("Grade", ["9", "11"])],
        );
        assert_eq!(names(&kept), vec!["A"]);
    }

    #[test]
    fn test_name_search_matches_first_last_and_full_name() {
        let identity = IdentityFields::default();
        let rows = vec![
            field_map([("Name", "1"), ("Student First", "Mary Ann"), ("Student Last", "Lee")]),
            field_map([("Name", "2"), ("Student First", "Jo"), ("Student Last", "Marsh")]),
            field_map([("Name", "3"), ("Student First", "Kim"), ("Student Last", "Park")]),
        ];

        assert_eq!(names(&search_rows(rows.clone(), "MAR", &identity)), vec!["1", "2"]);
        assert_eq!(names(&search_rows(rows.clone(), "ann lee", &identity)), vec!["1"]);
        assert_eq!(names(&search_rows(rows.clone(), "  ", &identity)), vec!["1", "2", "3"]);
        assert!(search_rows(rows, "zed", &identity).is_empty());
    }

    #[test]
    fn test_name_search_missing_names_only_match_blank() {
        let identity = IdentityFields::default();
        let row = field_map([("Grade", "9")]);
        assert!(matches_name_search(&row, "", &identity));
        assert!(!matches_name_search(&row, "9", &identity));
    }

    #[test]
    fn test_numeric_sort_when_both_numeric() {
        let mut rows = vec![
            field_map([("Name", "A"), ("Grade", "10")]),
            field_map([("Name", "B"), ("Grade", "9")]),
            field_map([("Name", "C"), ("Grade", "11")]),
        ];
        sort_rows(&mut rows, &[SortKey::asc("Grade")]);
        assert_eq!(names(&rows), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_multi_key_sort_is_stable() {
        let mut rows = vec![
            field_map([("Name", "A"), ("Part", "Alto"), ("Grade", "9")]),
            field_map([("Name", "B"), ("Part", "Tenor"), ("Grade", "10")]),
            field_map([("Name", "C"), ("Part", "Alto"), ("Grade", "10")]),
            field_map([("Name", "D"), ("Part", "Alto"), ("Grade", "10")]),
        ];
        sort_rows(&mut rows, &[SortKey::asc("Part"), SortKey::desc("Grade")]);
        assert_eq!(names(&rows), vec!["C", "D", "A", "B"]);
    }

    #[test]
    fn test_missing_values_sort_first() {
        let mut rows = vec![field_map([("Name", "A"), ("Part", "Bass")]), field_map([("Name", "B")])];
        sort_rows(&mut rows, &[SortKey::asc("Part")]);
        assert_eq!(names(&rows), vec!["B", "A"]);
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(SortKey::parse("Grade:desc"), Some(SortKey::desc("Grade")));
        assert_eq!(SortKey::parse("Grade"), Some(SortKey::asc("Grade")));
        assert_eq!(SortKey::parse("Time: 10:30"), Some(SortKey::asc("Time: 10:30")));
        assert_eq!(SortKey::parse(""), None);
    }
}
