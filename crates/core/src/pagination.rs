//! Paging and sorting math turning client parameters into query parameters.
//!
//! The sort specification is the only piece of client input that ends up
//! shaping a query rather than being bound as a value, so it is gated by a
//! per-resource safelist: [`PageRequest::validate`] rejects unknown values as
//! client errors, and [`PageRequest::sort_column`] refuses (panics) if a caller
//! skipped that validation.

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;

/// Leading character of a descending sort specification (`-price`).
pub const DESCENDING_MARKER: char = '-';

/// Highest page a client may ask for.
pub const MAX_PAGE: u64 = 10_000_000;

/// Largest page a client may ask for.
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// Client paging/sort parameters for one list query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
    pub sort: String,
    pub sort_safelist: &'static [&'static str],
}

impl PageRequest {
    pub fn new(
        page: u64,
        page_size: u64,
        sort: impl Into<String>,
        sort_safelist: &'static [&'static str],
    ) -> Self {
        Self {
            page,
            page_size,
            sort: sort.into(),
            sort_safelist,
        }
    }

    /// Build a request from raw query values and validate it.
    ///
    /// Negative `page` or `page_size` fail with the same range messages as
    /// values above the maximum.
    pub fn from_query(
        page: i64,
        page_size: i64,
        sort: impl Into<String>,
        sort_safelist: &'static [&'static str],
    ) -> Result<Self, ValidationErrors> {
        let request = Self::new(
            u64::try_from(page).unwrap_or(u64::MAX),
            u64::try_from(page_size).unwrap_or(u64::MAX),
            sort,
            sort_safelist,
        );
        request.validate()?;
        Ok(request)
    }

    /// Check page bounds and that `sort` is one of the safelisted values.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(
            self.page <= MAX_PAGE,
            "page",
            "must be greater or equal to 0 and lower or equal to 10 million",
        );
        errors.check(
            self.page_size <= MAX_PAGE_SIZE,
            "page_size",
            "must be greater or equal to 0 and lower or equal to 100",
        );
        errors.check(self.is_sort_safe(), "sort", "invalid sort value");
        errors.into_result()
    }

    pub fn is_sort_safe(&self) -> bool {
        self.sort_safelist.contains(&self.sort.as_str())
    }

    /// Column to sort by, with the descending marker stripped.
    ///
    /// # Panics
    /// If `sort` is not in the safelist. Callers must run [`validate`](Self::validate)
    /// first; reaching this with an unknown value is a programming error and no
    /// query may be built from it.
    pub fn sort_column(&self) -> &str {
        sort_column(&self.sort, self.sort_safelist)
    }

    pub fn sort_direction(&self) -> SortDirection {
        sort_direction(&self.sort)
    }

    pub fn offset(&self) -> u64 {
        offset(self.page, self.page_size)
    }

    pub fn limit(&self) -> u64 {
        self.page_size
    }
}

/// Rows to skip before the requested page. Page 0 reads like page 1.
pub fn offset(page: u64, page_size: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(page_size)
}

/// See [`PageRequest::sort_column`].
pub fn sort_column<'a>(sort: &'a str, safelist: &[&str]) -> &'a str {
    if safelist.contains(&sort) {
        return sort.strip_prefix(DESCENDING_MARKER).unwrap_or(sort);
    }

    panic!("unsafe sort parameter: {sort}");
}

pub fn sort_direction(sort: &str) -> SortDirection {
    if sort.starts_with(DESCENDING_MARKER) {
        SortDirection::Descending
    } else {
        SortDirection::Ascending
    }
}

/// Position of a page within the whole result set.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub current_page: u64,
    pub page_size: u64,
    pub first_page: u64,
    pub last_page: u64,
    pub total_records: u64,
}

impl Metadata {
    /// Metadata for `total_records` matches; all-zero when nothing matched.
    pub fn calculate(total_records: u64, page: u64, page_size: u64) -> Self {
        if total_records == 0 {
            return Self::default();
        }

        let last_page = if page_size == 0 {
            0
        } else {
            total_records.div_ceil(page_size)
        };

        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page,
            total_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAFELIST: &[&str] = &["id", "name", "price", "-id", "-name", "-price"];

    fn request(sort: &str) -> PageRequest {
        PageRequest::new(2, 20, sort, SAFELIST)
    }

    #[test]
    fn strips_descending_marker_from_safelisted_sort() {
        assert_eq!(request("-price").sort_column(), "price");
        assert_eq!(request("-price").sort_direction(), SortDirection::Descending);
        assert_eq!(request("name").sort_column(), "name");
        assert_eq!(request("name").sort_direction(), SortDirection::Ascending);
    }

    #[test]
    fn negative_query_values_fail_range_checks() {
        let errors = PageRequest::from_query(-1, -5, "id", SAFELIST).unwrap_err();
        assert_eq!(
            errors.get("page"),
            Some("must be greater or equal to 0 and lower or equal to 10 million")
        );
        assert_eq!(
            errors.get("page_size"),
            Some("must be greater or equal to 0 and lower or equal to 100")
        );

        let request = PageRequest::from_query(0, 0, "-name", SAFELIST).unwrap();
        assert_eq!(request.offset(), 0);
        assert_eq!(request.limit(), 0);
    }

    #[test]
    #[should_panic(expected = "unsafe sort parameter")]
    fn sort_column_refuses_unlisted_value() {
        let _ = request("price; DROP TABLE items").sort_column();
    }

    #[test]
    #[should_panic(expected = "unsafe sort parameter")]
    fn sort_column_requires_verbatim_match() {
        // "-description" strips to a safe-looking name but is not listed itself.
        let _ = sort_column("-description", &["description"]);
    }

    #[test]
    fn validate_reports_each_bad_field() {
        let req = PageRequest::new(MAX_PAGE + 1, 101, "colour", SAFELIST);
        let errors = req.validate().unwrap_err();
        assert_eq!(errors.get("sort"), Some("invalid sort value"));
        assert!(errors.get("page").is_some());
        assert!(errors.get("page_size").is_some());
    }

    #[test]
    fn validate_accepts_bounds() {
        assert!(PageRequest::new(0, 0, "id", SAFELIST).validate().is_ok());
        assert!(PageRequest::new(MAX_PAGE, MAX_PAGE_SIZE, "-id", SAFELIST).validate().is_ok());
    }

    #[test]
    fn offset_and_limit() {
        let req = PageRequest::new(3, 25, "id", SAFELIST);
        assert_eq!(req.offset(), 50);
        assert_eq!(req.limit(), 25);
        assert_eq!(offset(1, 25), 0);
        assert_eq!(offset(0, 25), 0);
    }

    #[test]
    fn metadata_rounds_last_page_up() {
        let m = Metadata::calculate(41, 2, 20);
        assert_eq!(
            m,
            Metadata {
                current_page: 2,
                page_size: 20,
                first_page: 1,
                last_page: 3,
                total_records: 41,
            }
        );
    }

    #[test]
    fn metadata_with_zero_page_size_does_not_divide() {
        let m = Metadata::calculate(5, 1, 0);
        assert_eq!(m.last_page, 0);
        assert_eq!(m.total_records, 5);
    }

    proptest! {
        #[test]
        fn offset_is_within_bounds(page in 0..=MAX_PAGE, page_size in 0..=MAX_PAGE_SIZE) {
            let req = PageRequest::new(page, page_size, "id", SAFELIST);
            prop_assert!(req.validate().is_ok());
            prop_assert!(req.offset() <= MAX_PAGE * MAX_PAGE_SIZE);
            prop_assert_eq!(req.limit(), page_size);
        }

        #[test]
        fn zero_total_means_zero_metadata(page in 0..=MAX_PAGE, page_size in 0..=MAX_PAGE_SIZE) {
            prop_assert_eq!(Metadata::calculate(0, page, page_size), Metadata::default());
        }

        #[test]
        fn last_page_covers_every_record(total in 1u64..100_000, page_size in 1..=MAX_PAGE_SIZE) {
            let m = Metadata::calculate(total, 1, page_size);
            prop_assert!(m.last_page * page_size >= total);
            prop_assert!((m.last_page - 1) * page_size < total);
        }

        #[test]
        fn unlisted_sort_never_validates(sort in "[a-z_;' -]{1,16}") {
            prop_assume!(!SAFELIST.contains(&sort.as_str()));
            let req = PageRequest::new(1, 10, sort, SAFELIST);
            prop_assert!(req.validate().is_err());
        }
    }
}
