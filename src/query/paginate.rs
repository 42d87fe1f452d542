use super::Window;
use crate::error::AppError;
use crate::request::QueryParams;
use serde::Serialize;

/// Literal page size that selects unbounded mode.
pub const UNBOUNDED: &str = "-1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pagination {
    /// `page` is 1-based; `page.offset` carries the page number.
    Paged { page: u64, size: u64 },
    /// Whole result set as a single page.
    Unbounded,
}

impl Pagination {
    pub fn from_params(params: &QueryParams, default_size: i64) -> Result<Self, AppError> {
        let size = match params.page_limit.as_deref().map(str::trim) {
            Some(UNBOUNDED) => return Ok(Pagination::Unbounded),
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    AppError::InvalidRequest(format!(
                        "Invalid page[limit] {}: use a positive integer or -1",
                        raw
                    ))
                })?,
            None => default_size.max(1) as u64,
        };
        let page = params
            .page_offset
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);
        Ok(Pagination::Paged { page, size })
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Pagination::Unbounded)
    }

    pub fn window(&self) -> Window {
        match *self {
            Pagination::Paged { page, size } => Window::Range {
                offset: (page - 1).saturating_mul(size),
                limit: size,
            },
            Pagination::Unbounded => Window::All,
        }
    }

    pub fn describe(&self, total: u64, count: u64) -> PageDescriptor {
        match *self {
            Pagination::Paged { page, size } => {
                let total_pages = total.div_ceil(size).max(1);
                PageDescriptor {
                    total,
                    count,
                    per_page: size as i64,
                    current_page: page,
                    total_pages,
                    has_more_pages: page < total_pages,
                }
            }
            Pagination::Unbounded => PageDescriptor {
                total: count,
                count,
                per_page: -1,
                current_page: 1,
                total_pages: 1,
                has_more_pages: false,
            },
        }
    }
}

/// Pagination block rendered under `meta.pagination`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageDescriptor {
    pub total: u64,
    pub count: u64,
    pub per_page: i64,
    pub current_page: u64,
    pub total_pages: u64,
    pub has_more_pages: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(offset: Option<&str>, limit: Option<&str>) -> QueryParams {
        QueryParams {
            page_offset: offset.map(String::from),
            page_limit: limit.map(String::from),
            ..QueryParams::default()
        }
    }

    #[test]
    fn paged_window_uses_page_number() {
        let p = Pagination::from_params(&params(Some("3"), Some("5")), 10).unwrap();
        assert_eq!(p.window(), Window::Range { offset: 10, limit: 5 });
        let d = p.describe(12, 2);
        assert_eq!(d.total_pages, 3);
        assert!(!d.has_more_pages);
    }

    #[test]
    fn defaults_and_bad_page_numbers() {
        let p = Pagination::from_params(&params(Some("zero"), None), 10).unwrap();
        assert_eq!(p, Pagination::Paged { page: 1, size: 10 });
        assert!(Pagination::from_params(&params(None, Some("0")), 10).is_err());
    }

    #[test]
    fn unbounded_reports_single_page() {
        let p = Pagination::from_params(&params(Some("4"), Some("-1")), 10).unwrap();
        assert_eq!(p.window(), Window::All);
        let d = p.describe(0, 37);
        assert_eq!(d.total, 37);
        assert_eq!(d.per_page, -1);
        assert!(!d.has_more_pages);
    }
}
