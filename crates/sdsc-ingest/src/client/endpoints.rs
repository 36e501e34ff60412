//! Per-category endpoint parameters
//!
//! Fixed configuration only: which path a category is served from, which
//! query parameters it always carries and how many rows it accepts per page.

use std::collections::BTreeMap;

use sdsc_common::types::{Category, PageRequest};

use crate::config::MAX_PAGE_SIZE;

/// Static description of one list endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    pub category: Category,
    pub path: &'static str,
    /// Parameters sent on every request. Request filters take precedence.
    pub fixed_params: &'static [(&'static str, &'static str)],
    pub max_page_size: u32,
}

const STORES: EndpointSpec = EndpointSpec {
    category: Category::Stores,
    path: "/storeListInDong",
    fixed_params: &[],
    max_page_size: MAX_PAGE_SIZE,
};

const DISTRICTS: EndpointSpec = EndpointSpec {
    category: Category::Districts,
    path: "/baroApi",
    fixed_params: &[("resId", "dong"), ("catId", "cty")],
    max_page_size: MAX_PAGE_SIZE,
};

const ZONES: EndpointSpec = EndpointSpec {
    category: Category::Zones,
    path: "/storeZoneInAdmi",
    fixed_params: &[],
    max_page_size: MAX_PAGE_SIZE,
};

const CLASSIFICATIONS: EndpointSpec = EndpointSpec {
    category: Category::Classifications,
    path: "/smallUpjongList",
    fixed_params: &[],
    max_page_size: MAX_PAGE_SIZE,
};

impl EndpointSpec {
    pub fn for_category(category: Category) -> &'static EndpointSpec {
        match category {
            Category::Stores => &STORES,
            Category::Districts => &DISTRICTS,
            Category::Zones => &ZONES,
            Category::Classifications => &CLASSIFICATIONS,
        }
    }

    /// Requested page size clamped to what the endpoint accepts
    pub fn page_size(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_page_size)
    }

    /// Full query string for `request`, service key included
    pub fn query(&self, request: &PageRequest, service_key: &str) -> Vec<(String, String)> {
        let mut params: BTreeMap<&str, String> = self
            .fixed_params
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect();

        for (key, value) in &request.filters {
            params.insert(key.as_str(), value.clone());
        }

        params.insert("serviceKey", service_key.to_string());
        params.insert("type", "json".to_string());
        params.insert("pageNo", request.cursor.page().to_string());
        params.insert("numOfRows", self.page_size(request.page_size).to_string());

        params
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

/// Region and industry a collection run is narrowed to.
///
/// Codes, not names. Name lookups go through
/// [`RegionResolver`](super::RegionResolver).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryScope {
    /// Province code (ctprvnCd), e.g. "11" for Seoul
    pub sido_code: Option<String>,
    /// District code (signguCd), e.g. "11680"
    pub sigungu_code: Option<String>,
    /// Large industry class (indsLclsCd), e.g. "I2"
    pub industry_code: Option<String>,
}

impl CategoryScope {
    pub fn new(sido_code: impl Into<String>) -> Self {
        Self {
            sido_code: Some(sido_code.into()),
            ..Self::default()
        }
    }

    pub fn with_sigungu(mut self, code: impl Into<String>) -> Self {
        self.sigungu_code = Some(code.into());
        self
    }

    pub fn with_industry(mut self, code: impl Into<String>) -> Self {
        self.industry_code = Some(code.into());
        self
    }

    /// Query filters for one category under this scope
    pub fn filters(&self, category: Category) -> BTreeMap<String, String> {
        let mut filters = BTreeMap::new();

        match category {
            Category::Stores | Category::Zones => {
                if let Some((div_id, key)) = self.admin_division() {
                    filters.insert("divId".to_string(), div_id.to_string());
                    filters.insert("key".to_string(), key.to_string());
                }
                if category == Category::Stores {
                    if let Some(ref industry) = self.industry_code {
                        filters.insert("indsLclsCd".to_string(), industry.clone());
                    }
                }
            },
            Category::Districts => {
                if let Some(ref sido) = self.sido_code {
                    filters.insert("ctprvnCd".to_string(), sido.clone());
                }
            },
            Category::Classifications => {
                if let Some(ref industry) = self.industry_code {
                    filters.insert("indsLclsCd".to_string(), industry.clone());
                }
            },
        }

        filters
    }

    /// Narrowest administrative division set on the scope
    fn admin_division(&self) -> Option<(&'static str, &str)> {
        match (&self.sigungu_code, &self.sido_code) {
            (Some(sigungu), _) => Some(("signguCd", sigungu.as_str())),
            (None, Some(sido)) => Some(("ctprvnCd", sido.as_str())),
            (None, None) => None,
        }
    }
}
