use anyhow::Context;
use chrono::NaiveDate;
use futures_util::{stream, StreamExt, TryStreamExt};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info};

use crate::filter::{BindValue, FilteredQuery, QueryFilter};
use crate::models::{
    ConvocationValue, Department, DeptCgpaStats, DeptCgpas, DeptCount, GraduatePage,
    GraduateRecord,
};

/// Per-department aggregates in flight at once.
const DEPT_FANOUT: usize = 4;

pub async fn table_exists(pool: &PgPool, dept: Department) -> anyhow::Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_name = $1
        )
        "#,
    )
    .bind(dept.table_name())
    .fetch_one(pool)
    .await?;

    if !exists {
        debug!(table = dept.table_name(), "department table not provisioned");
    }
    Ok(exists)
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    binds: &'q [BindValue],
) -> Query<'q, Postgres, PgArguments> {
    for value in binds {
        query = match value {
            BindValue::Text(text) => query.bind(text.as_str()),
            BindValue::Float(number) => query.bind(*number),
        };
    }
    query
}

fn graduate_from_row(row: &PgRow) -> anyhow::Result<GraduateRecord> {
    Ok(GraduateRecord {
        name: row.try_get("name")?,
        program: row.try_get("program")?,
        cgpa: row.try_get("cgpa")?,
        date_of_graduation: row.try_get("date_of_graduation")?,
        semester: row.try_get("semester")?,
        convocation: row.try_get("convocation")?,
        registration: row.try_get("registration")?,
    })
}

pub async fn fetch_graduates(
    pool: &PgPool,
    dept: Department,
    filter: &QueryFilter,
) -> anyhow::Result<GraduatePage> {
    if !table_exists(pool, dept).await? {
        return Ok(GraduatePage::empty(filter.page));
    }

    let query = FilteredQuery::build(dept, filter);

    let count_sql = query.count_sql();
    let total: i64 = bind_all(sqlx::query(&count_sql), &query.binds)
        .fetch_one(pool)
        .await?
        .try_get("count")?;

    let page_sql = query.page_sql();
    let rows = bind_all(sqlx::query(&page_sql), &query.binds)
        .bind(filter.offset())
        .bind(i64::from(filter.page_size))
        .fetch_all(pool)
        .await?;

    let data = rows
        .iter()
        .map(graduate_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;

    debug!(
        table = dept.table_name(),
        total,
        page = filter.page,
        returned = data.len(),
        "fetched graduates"
    );

    Ok(GraduatePage::new(
        data,
        u64::try_from(total).unwrap_or(0),
        filter.page,
        filter.page_size,
    ))
}

pub async fn convocation_counts(
    pool: &PgPool,
    dept: Department,
) -> anyhow::Result<Vec<ConvocationValue<i64>>> {
    if !table_exists(pool, dept).await? {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT COALESCE(TRIM(convocation), '') AS convocation, COUNT(*) AS value \
         FROM public.{} GROUP BY 1 ORDER BY 1",
        dept.table_name()
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        values.push(ConvocationValue {
            convocation: row.try_get("convocation")?,
            value: row.try_get("value")?,
        });
    }
    Ok(values)
}

/// Average CGPA per raw convocation label, rounded to two decimals.
///
/// Rows with a NULL cgpa are left out, so a convocation whose rows all lack a
/// cgpa does not appear at all rather than reporting a null average.
pub async fn convocation_cgpa(
    pool: &PgPool,
    dept: Department,
) -> anyhow::Result<Vec<ConvocationValue<f64>>> {
    if !table_exists(pool, dept).await? {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT COALESCE(convocation, '') AS convocation, \
         ROUND(AVG(cgpa::numeric), 2)::float8 AS value \
         FROM public.{} WHERE cgpa IS NOT NULL GROUP BY convocation ORDER BY convocation",
        dept.table_name()
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        values.push(ConvocationValue {
            convocation: row.try_get("convocation")?,
            value: row.try_get("value")?,
        });
    }
    Ok(values)
}

async fn dept_cgpa_stats(pool: &PgPool, dept: Department) -> anyhow::Result<DeptCgpaStats> {
    if !table_exists(pool, dept).await? {
        return Ok(DeptCgpaStats {
            department: dept.label(),
            avg_cgpa: 0.0,
            min_cgpa: 0.0,
            max_cgpa: 0.0,
        });
    }

    let sql = format!(
        "SELECT \
            ROUND(AVG(cgpa::numeric), 2)::float8 AS avg_cgpa, \
            ROUND(MIN(cgpa::numeric), 2)::float8 AS min_cgpa, \
            ROUND(MAX(cgpa::numeric), 2)::float8 AS max_cgpa \
         FROM public.{}",
        dept.table_name()
    );
    let row = sqlx::query(&sql).fetch_one(pool).await?;
    let avg: Option<f64> = row.try_get("avg_cgpa")?;
    let min: Option<f64> = row.try_get("min_cgpa")?;
    let max: Option<f64> = row.try_get("max_cgpa")?;

    Ok(DeptCgpaStats {
        department: dept.label(),
        avg_cgpa: avg.unwrap_or(0.0),
        min_cgpa: min.unwrap_or(0.0),
        max_cgpa: max.unwrap_or(0.0),
    })
}

pub async fn cgpa_stats_by_dept(pool: &PgPool) -> anyhow::Result<Vec<DeptCgpaStats>> {
    stream::iter(Department::ALL)
        .map(|dept| dept_cgpa_stats(pool, dept))
        .buffered(DEPT_FANOUT)
        .try_collect()
        .await
}

async fn dept_count(pool: &PgPool, dept: Department) -> anyhow::Result<DeptCount> {
    let count: i64 = if table_exists(pool, dept).await? {
        let sql = format!("SELECT COUNT(*) AS count FROM public.{}", dept.table_name());
        sqlx::query(&sql).fetch_one(pool).await?.try_get("count")?
    } else {
        0
    };

    Ok(DeptCount {
        department: dept.label(),
        count,
    })
}

pub async fn count_by_dept(pool: &PgPool) -> anyhow::Result<Vec<DeptCount>> {
    stream::iter(Department::ALL)
        .map(|dept| dept_count(pool, dept))
        .buffered(DEPT_FANOUT)
        .try_collect()
        .await
}

async fn dept_cgpas(pool: &PgPool, dept: Department) -> anyhow::Result<DeptCgpas> {
    let cgpas: Vec<f64> = if table_exists(pool, dept).await? {
        let sql = format!(
            "SELECT cgpa::float8 AS cgpa FROM public.{} WHERE cgpa IS NOT NULL",
            dept.table_name()
        );
        sqlx::query_scalar(&sql).fetch_all(pool).await?
    } else {
        Vec::new()
    };

    Ok(DeptCgpas {
        department: dept.label(),
        cgpas,
    })
}

pub async fn cgpa_by_dept(pool: &PgPool) -> anyhow::Result<Vec<DeptCgpas>> {
    stream::iter(Department::ALL)
        .map(|dept| dept_cgpas(pool, dept))
        .buffered(DEPT_FANOUT)
        .try_collect()
        .await
}

pub async fn provision(pool: &PgPool, dept: Department) -> anyhow::Result<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS public.{} (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            program TEXT,
            cgpa TEXT CHECK (cgpa IS NULL OR cgpa ~ '^[0-9]+(\.[0-9]+)?$'),
            date_of_graduation DATE,
            semester TEXT,
            convocation TEXT,
            registration TEXT UNIQUE
        )
        "#,
        dept.table_name()
    );
    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to provision {}", dept.table_name()))?;
    info!(table = dept.table_name(), "department table ready");
    Ok(())
}

struct NewGraduate<'a> {
    name: &'a str,
    program: Option<&'a str>,
    cgpa: Option<&'a str>,
    date_of_graduation: Option<NaiveDate>,
    semester: Option<&'a str>,
    convocation: Option<&'a str>,
    registration: &'a str,
}

async fn insert_graduate(
    pool: &PgPool,
    dept: Department,
    graduate: NewGraduate<'_>,
) -> anyhow::Result<bool> {
    let sql = format!(
        r#"
        INSERT INTO public.{}
        (name, program, cgpa, date_of_graduation, semester, convocation, registration)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (registration) DO NOTHING
        "#,
        dept.table_name()
    );
    let result = sqlx::query(&sql)
        .bind(graduate.name)
        .bind(graduate.program)
        .bind(graduate.cgpa)
        .bind(graduate.date_of_graduation)
        .bind(graduate.semester)
        .bind(graduate.convocation)
        .bind(graduate.registration)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool, dept: Department) -> anyhow::Result<usize> {
    provision(pool, dept).await?;

    let program = format!("B.Sc. in {}", dept.label());
    let graduates = vec![
        ("Nadia Rahman", "3.87", (2024, 3, 9), "Spring 2023", "5th", "001"),
        ("Tanvir Hossain", "3.42", (2024, 3, 9), "Spring 2023", "5th ", "002"),
        ("Farhana Akter", "3.05", (2023, 2, 18), "Fall 2022", " 4th", "003"),
        ("Imran Kabir", "2.76", (2023, 2, 18), "Fall 2022", "4th", "004"),
        ("Sadia Islam", "3.64", (2022, 1, 22), "Spring 2021", "3rd", "005"),
    ];

    let mut inserted = 0usize;
    for (name, cgpa, (year, month, day), semester, convocation, serial) in graduates {
        let registration = format!("{}-2019-{serial}", dept.label());
        let date = NaiveDate::from_ymd_opt(year, month, day).context("invalid date")?;
        let added = insert_graduate(
            pool,
            dept,
            NewGraduate {
                name,
                program: Some(program.as_str()),
                cgpa: Some(cgpa),
                date_of_graduation: Some(date),
                semester: Some(semester),
                convocation: Some(convocation),
                registration: &registration,
            },
        )
        .await?;
        if added {
            inserted += 1;
        }
    }

    info!(table = dept.table_name(), inserted, "seed complete");
    Ok(inserted)
}

pub async fn import_csv(
    pool: &PgPool,
    dept: Department,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        name: String,
        program: Option<String>,
        cgpa: Option<String>,
        date_of_graduation: Option<NaiveDate>,
        semester: Option<String>,
        convocation: Option<String>,
        registration: String,
    }

    provision(pool, dept).await?;

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed CSV row at line {line}"))?;
        let cgpa = row.cgpa.as_deref().map(str::trim).filter(|c| !c.is_empty());
        if let Some(value) = cgpa {
            value
                .parse::<f64>()
                .with_context(|| format!("non-numeric cgpa `{value}` at line {line}"))?;
        }

        let added = insert_graduate(
            pool,
            dept,
            NewGraduate {
                name: row.name.trim(),
                program: row.program.as_deref(),
                cgpa,
                date_of_graduation: row.date_of_graduation,
                semester: row.semester.as_deref(),
                convocation: row.convocation.as_deref(),
                registration: row.registration.trim(),
            },
        )
        .await?;

        if added {
            inserted += 1;
        }
    }

    info!(
        table = dept.table_name(),
        inserted,
        path = %csv_path.display(),
        "csv import complete"
    );
    Ok(inserted)
}
