use serde::Deserialize;

use crate::models::Department;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Query string of `GET /graduates/{dept}`. Everything arrives as text so a
/// malformed bound never rejects the request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraduateParams {
    pub search: Option<String>,
    pub min_cgpa: Option<String>,
    pub max_cgpa: Option<String>,
    pub registration: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    pub search: Option<String>,
    pub min_cgpa: Option<f64>,
    pub max_cgpa: Option<f64>,
    pub registration: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            search: None,
            min_cgpa: None,
            max_cgpa: None,
            registration: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueryFilter {
    pub fn from_params(params: &GraduateParams) -> Self {
        Self {
            search: non_empty(params.search.as_deref()),
            min_cgpa: parse_bound(params.min_cgpa.as_deref()),
            max_cgpa: parse_bound(params.max_cgpa.as_deref()),
            registration: non_empty(params.registration.as_deref()),
            page: parse_positive(params.page.as_deref()).unwrap_or(1),
            page_size: parse_positive(params.limit.as_deref()).unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }

    pub fn with_page(&self, page: u32) -> Self {
        Self {
            page: page.max(1),
            ..self.clone()
        }
    }

    /// Saturates instead of overflowing; an offset past the last row just
    /// yields an empty page.
    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1).saturating_mul(i64::from(self.page_size))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_bound(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn parse_positive(value: Option<&str>) -> Option<u32> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v >= 1)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
}

/// Wraps caller text for a literal, case-insensitive substring `ILIKE`.
pub fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Float(f64),
}

/// The filtered, unpaginated SELECT for one department and its positional
/// parameters. Count and page queries are both derived from it so they can
/// never disagree on the predicate set.
#[derive(Debug, Clone)]
pub struct FilteredQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

pub const GRADUATE_COLUMNS: &str =
    "name, program, cgpa, date_of_graduation, semester, convocation, registration";

impl FilteredQuery {
    pub fn build(dept: Department, filter: &QueryFilter) -> Self {
        let mut sql = format!(
            "SELECT {GRADUATE_COLUMNS} FROM public.{} WHERE 1=1",
            dept.table_name()
        );
        let mut binds = Vec::new();

        if let Some(search) = &filter.search {
            binds.push(BindValue::Text(like_pattern(search)));
            let n = binds.len();
            sql.push_str(&format!(" AND (name ILIKE ${n} OR program ILIKE ${n})"));
        }

        if let Some(min) = filter.min_cgpa {
            binds.push(BindValue::Float(min));
            sql.push_str(&format!(" AND cgpa::float8 >= ${}", binds.len()));
        }

        if let Some(max) = filter.max_cgpa {
            binds.push(BindValue::Float(max));
            sql.push_str(&format!(" AND cgpa::float8 <= ${}", binds.len()));
        }

        if let Some(registration) = &filter.registration {
            binds.push(BindValue::Text(like_pattern(registration)));
            sql.push_str(&format!(" AND registration ILIKE ${}", binds.len()));
        }

        Self { sql, binds }
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) AS count FROM ({}) AS sub", self.sql)
    }

    /// Offset and limit bind after the filter parameters.
    pub fn page_sql(&self) -> String {
        let offset = self.binds.len() + 1;
        format!(
            "{} ORDER BY date_of_graduation DESC OFFSET ${} LIMIT ${}",
            self.sql,
            offset,
            offset + 1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> GraduateParams {
        let mut params = GraduateParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "search" => params.search = value,
                "minCgpa" => params.min_cgpa = value,
                "maxCgpa" => params.max_cgpa = value,
                "registration" => params.registration = value,
                "page" => params.page = value,
                "limit" => params.limit = value,
                other => panic!("unexpected key {other}"),
            }
        }
        params
    }

    #[test]
    fn defaults_apply_without_input() {
        let filter = QueryFilter::from_params(&GraduateParams::default());
        assert_eq!(filter, QueryFilter::default());
        assert_eq!(filter.offset(), 0);
    }

    #[test]
    fn page_and_limit_clamp_to_defaults() {
        let filter = QueryFilter::from_params(&params(&[("page", "-2"), ("limit", "0")]));
        assert_eq!(filter.page, 1);
        assert_eq!(filter.page_size, DEFAULT_PAGE_SIZE);

        let filter = QueryFilter::from_params(&params(&[("page", "abc"), ("limit", "-5")]));
        assert_eq!(filter.page, 1);
        assert_eq!(filter.page_size, DEFAULT_PAGE_SIZE);

        let filter = QueryFilter::from_params(&params(&[("page", "3"), ("limit", "25")]));
        assert_eq!(filter.page, 3);
        assert_eq!(filter.offset(), 50);
    }

    #[test]
    fn huge_page_and_limit_saturate_the_offset() {
        let filter = QueryFilter::from_params(&params(&[
            ("page", "99999999999"),
            ("limit", "99999999999"),
        ]));
        assert_eq!(filter.page, u32::MAX);
        assert_eq!(filter.page_size, u32::MAX);
        assert_eq!(filter.offset(), i64::MAX);

        let filter = QueryFilter::from_params(&params(&[("page", "4294967295"), ("limit", "10")]));
        assert_eq!(filter.offset(), 42_949_672_940);
    }

    #[test]
    fn unparseable_cgpa_bounds_are_dropped() {
        let filter = QueryFilter::from_params(&params(&[
            ("minCgpa", "three"),
            ("maxCgpa", "NaN"),
        ]));
        assert_eq!(filter.min_cgpa, None);
        assert_eq!(filter.max_cgpa, None);

        let filter = QueryFilter::from_params(&params(&[("minCgpa", " 3.5 "), ("maxCgpa", "")]));
        assert_eq!(filter.min_cgpa, Some(3.5));
        assert_eq!(filter.max_cgpa, None);
    }

    #[test]
    fn blank_text_filters_count_as_absent() {
        let filter = QueryFilter::from_params(&params(&[("search", "   "), ("registration", "")]));
        assert_eq!(filter.search, None);
        assert_eq!(filter.registration, None);
    }

    #[test]
    fn no_filters_is_an_unconditional_scan() {
        let query = FilteredQuery::build(Department::Cse, &QueryFilter::default());
        assert_eq!(
            query.sql,
            format!("SELECT {GRADUATE_COLUMNS} FROM public.graduates_cse WHERE 1=1")
        );
        assert!(query.binds.is_empty());
        assert!(query.page_sql().ends_with("ORDER BY date_of_graduation DESC OFFSET $1 LIMIT $2"));
    }

    #[test]
    fn search_reuses_one_parameter_for_name_and_program() {
        let filter = QueryFilter {
            search: Some("rahman".to_string()),
            ..QueryFilter::default()
        };
        let query = FilteredQuery::build(Department::Eee, &filter);
        assert!(query.sql.contains("(name ILIKE $1 OR program ILIKE $1)"));
        assert_eq!(query.binds, vec![BindValue::Text("%rahman%".to_string())]);
    }

    #[test]
    fn predicates_number_positionally_in_order() {
        let filter = QueryFilter {
            search: Some("ali".to_string()),
            min_cgpa: Some(3.0),
            max_cgpa: Some(3.8),
            registration: Some("2019".to_string()),
            ..QueryFilter::default()
        };
        let query = FilteredQuery::build(Department::Bba, &filter);
        assert!(query.sql.contains("cgpa::float8 >= $2"));
        assert!(query.sql.contains("cgpa::float8 <= $3"));
        assert!(query.sql.contains("registration ILIKE $4"));
        assert_eq!(query.binds.len(), 4);
        assert!(query.page_sql().ends_with("OFFSET $5 LIMIT $6"));
        assert!(query.count_sql().starts_with("SELECT COUNT(*) AS count FROM (SELECT"));
        assert!(!query.count_sql().contains("ORDER BY"));
    }

    #[test]
    fn user_text_never_reaches_sql_text() {
        let hostile = "'; DROP TABLE graduates_eee; --";
        let filter = QueryFilter {
            search: Some(hostile.to_string()),
            registration: Some(hostile.to_string()),
            ..QueryFilter::default()
        };
        let query = FilteredQuery::build(Department::Eee, &filter);
        assert!(!query.sql.contains("DROP"));
        assert!(!query.page_sql().contains("DROP"));
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(like_pattern("50%_a\\b"), "%50\\%\\_a\\\\b%");
    }
}
