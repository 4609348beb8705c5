use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

/// Departments with a graduates table. The order of `ALL` is the order every
/// per-department endpoint reports in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Department {
    Eee,
    Cse,
    Mecha,
    Civil,
    Ipe,
    Bba,
    Textile,
    Arch,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown department `{0}` (expected eee, cse, mecha, civil, ipe, bba, textile or arch)")]
pub struct UnknownDepartment(pub String);

impl Department {
    pub const ALL: [Department; 8] = [
        Department::Eee,
        Department::Cse,
        Department::Mecha,
        Department::Civil,
        Department::Ipe,
        Department::Bba,
        Department::Textile,
        Department::Arch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Department::Eee => "eee",
            Department::Cse => "cse",
            Department::Mecha => "mecha",
            Department::Civil => "civil",
            Department::Ipe => "ipe",
            Department::Bba => "bba",
            Department::Textile => "textile",
            Department::Arch => "arch",
        }
    }

    /// Table identifier in the `public` schema. This is the only text ever
    /// interpolated into SQL, so it must stay a static literal.
    pub fn table_name(self) -> &'static str {
        match self {
            Department::Eee => "graduates_eee",
            Department::Cse => "graduates_cse",
            Department::Mecha => "graduates_mecha",
            Department::Civil => "graduates_civil",
            Department::Ipe => "graduates_ipe",
            Department::Bba => "graduates_bba",
            Department::Textile => "graduates_textile",
            Department::Arch => "graduates_arch",
        }
    }

    pub fn label(self) -> String {
        self.as_str().to_uppercase()
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Department {
    type Err = UnknownDepartment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_lowercase();
        Department::ALL
            .into_iter()
            .find(|dept| dept.as_str() == token)
            .ok_or_else(|| UnknownDepartment(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraduateRecord {
    pub name: Option<String>,
    pub program: Option<String>,
    pub cgpa: Option<String>,
    pub date_of_graduation: Option<NaiveDate>,
    pub semester: Option<String>,
    pub convocation: Option<String>,
    pub registration: Option<String>,
}

/// One page of graduates plus the paging state the client navigates with.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraduatePage {
    pub data: Vec<GraduateRecord>,
    pub total_pages: u32,
    pub current_page: u32,
    #[serde(skip)]
    pub total_records: u64,
}

impl GraduatePage {
    pub fn new(data: Vec<GraduateRecord>, total_records: u64, page: u32, page_size: u32) -> Self {
        Self {
            data,
            total_pages: total_pages(total_records, page_size),
            current_page: page,
            total_records,
        }
    }

    pub fn empty(page: u32) -> Self {
        Self::new(Vec::new(), 0, page, 1)
    }
}

pub fn total_pages(total_records: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    u32::try_from(total_records.div_ceil(size)).unwrap_or(u32::MAX)
}

/// A convocation label with its aggregate, as the per-department chart
/// endpoints report it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvocationValue<T> {
    pub convocation: String,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeptCgpaStats {
    pub department: String,
    pub avg_cgpa: f64,
    pub min_cgpa: f64,
    pub max_cgpa: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeptCount {
    pub department: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeptCgpas {
    pub department: String,
    pub cgpas: Vec<f64>,
}
