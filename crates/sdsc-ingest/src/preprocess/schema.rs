//! Declared record schemas, one per category
//!
//! Raw field names are the API's camelCase names; column names are what the
//! snapshots and relational tables use.

use sdsc_common::types::Category;

/// Target type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Short code drawn from a closed set (region codes, industry classes)
    Categorical,
}

impl FieldKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Categorical => "TEXT",
            FieldKind::Integer | FieldKind::Boolean => "INTEGER",
            FieldKind::Float => "REAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub raw: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    /// Inclusive bounds for numeric fields; values outside become missing
    pub range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategorySchema {
    pub category: Category,
    /// Raw field carrying the natural key
    pub key_raw: &'static str,
    pub key_column: &'static str,
    /// Every non-key field, in column order
    pub fields: &'static [FieldSpec],
    pub indexes: &'static [IndexSpec],
}

impl CategorySchema {
    pub fn for_category(category: Category) -> &'static CategorySchema {
        match category {
            Category::Stores => &STORES,
            Category::Districts => &DISTRICTS,
            Category::Zones => &ZONES,
            Category::Classifications => &CLASSIFICATIONS,
        }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.column == column)
    }

    pub fn table(&self) -> &'static str {
        self.category.table_name()
    }
}

const fn text(raw: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec {
        raw,
        column,
        kind: FieldKind::Text,
        range: None,
    }
}

const fn code(raw: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec {
        raw,
        column,
        kind: FieldKind::Categorical,
        range: None,
    }
}

const fn number(raw: &'static str, column: &'static str, kind: FieldKind, range: (f64, f64)) -> FieldSpec {
    FieldSpec {
        raw,
        column,
        kind,
        range: Some(range),
    }
}

const NON_NEGATIVE: (f64, f64) = (0.0, f64::INFINITY);

/// WGS84 bounding box of South Korea
pub const KOREA_LON: (f64, f64) = (124.0, 132.0);
pub const KOREA_LAT: (f64, f64) = (33.0, 43.0);

const STORES: CategorySchema = CategorySchema {
    category: Category::Stores,
    key_raw: "bizesId",
    key_column: "bizes_id",
    fields: &[
        text("bizesNm", "bizes_nm"),
        text("brchNm", "brch_nm"),
        code("indsLclsCd", "inds_lcls_cd"),
        text("indsLclsNm", "inds_lcls_nm"),
        code("indsMclsCd", "inds_mcls_cd"),
        text("indsMclsNm", "inds_mcls_nm"),
        code("indsSclsCd", "inds_scls_cd"),
        text("indsSclsNm", "inds_scls_nm"),
        code("ksicCd", "ksic_cd"),
        text("ksicNm", "ksic_nm"),
        code("ctprvnCd", "ctprvn_cd"),
        text("ctprvnNm", "ctprvn_nm"),
        code("signguCd", "signgu_cd"),
        text("signguNm", "signgu_nm"),
        code("adongCd", "adong_cd"),
        text("adongNm", "adong_nm"),
        code("ldongCd", "ldong_cd"),
        text("ldongNm", "ldong_nm"),
        text("lnoAdr", "lno_adr"),
        number("lnoMnno", "lno_mnno", FieldKind::Integer, NON_NEGATIVE),
        number("lnoSlno", "lno_slno", FieldKind::Integer, NON_NEGATIVE),
        text("rdnmAdr", "rdnm_adr"),
        number("bldMnno", "bld_mnno", FieldKind::Integer, NON_NEGATIVE),
        number("bldSlno", "bld_slno", FieldKind::Integer, NON_NEGATIVE),
        text("bldNm", "bld_nm"),
        number("flrNo", "flr_no", FieldKind::Integer, NON_NEGATIVE),
        text("hoNo", "ho_no"),
        number("lon", "lon", FieldKind::Float, KOREA_LON),
        number("lat", "lat", FieldKind::Float, KOREA_LAT),
    ],
    indexes: &[
        IndexSpec {
            name: "idx_stores_signgu",
            columns: &["signgu_cd"],
        },
        IndexSpec {
            name: "idx_stores_adong",
            columns: &["adong_cd"],
        },
        IndexSpec {
            name: "idx_stores_industry",
            columns: &["inds_lcls_cd", "inds_mcls_cd", "inds_scls_cd"],
        },
        IndexSpec {
            name: "idx_stores_location",
            columns: &["lon", "lat"],
        },
    ],
};

const DISTRICTS: CategorySchema = CategorySchema {
    category: Category::Districts,
    key_raw: "signguCd",
    key_column: "signgu_cd",
    fields: &[
        text("signguNm", "signgu_nm"),
        code("ctprvnCd", "ctprvn_cd"),
        text("ctprvnNm", "ctprvn_nm"),
        text("stdrDt", "stdr_dt"),
    ],
    indexes: &[IndexSpec {
        name: "idx_districts_ctprvn",
        columns: &["ctprvn_cd"],
    }],
};

const ZONES: CategorySchema = CategorySchema {
    category: Category::Zones,
    key_raw: "trarNo",
    key_column: "trar_no",
    fields: &[
        text("mainTrarNm", "main_trar_nm"),
        code("ctprvnCd", "ctprvn_cd"),
        text("ctprvnNm", "ctprvn_nm"),
        code("signguCd", "signgu_cd"),
        text("signguNm", "signgu_nm"),
        number("trarArea", "trar_area", FieldKind::Float, NON_NEGATIVE),
        number("coordNum", "coord_num", FieldKind::Integer, NON_NEGATIVE),
        text("coords", "coords"),
        text("stdrDt", "stdr_dt"),
    ],
    indexes: &[IndexSpec {
        name: "idx_zones_signgu",
        columns: &["signgu_cd"],
    }],
};

const CLASSIFICATIONS: CategorySchema = CategorySchema {
    category: Category::Classifications,
    key_raw: "indsSclsCd",
    key_column: "inds_scls_cd",
    fields: &[
        text("indsSclsNm", "inds_scls_nm"),
        code("indsLclsCd", "inds_lcls_cd"),
        text("indsLclsNm", "inds_lcls_nm"),
        code("indsMclsCd", "inds_mcls_cd"),
        text("indsMclsNm", "inds_mcls_nm"),
        text("stdrDt", "stdr_dt"),
    ],
    indexes: &[IndexSpec {
        name: "idx_classifications_lcls",
        columns: &["inds_lcls_cd"],
    }],
};
