use std::future::Future;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tracing::warn;

use crate::db;
use crate::models::{ConvocationValue, Department, DeptCgpaStats, DeptCgpas, DeptCount};
use crate::shape::{self, HistogramSpec};

/// The aggregate reads behind the dashboard charts.
#[async_trait]
pub trait ChartSource {
    async fn convocation_counts(&self, dept: Department)
        -> anyhow::Result<Vec<ConvocationValue<i64>>>;
    async fn convocation_cgpa(&self, dept: Department)
        -> anyhow::Result<Vec<ConvocationValue<f64>>>;
    async fn cgpa_stats_by_dept(&self) -> anyhow::Result<Vec<DeptCgpaStats>>;
    async fn count_by_dept(&self) -> anyhow::Result<Vec<DeptCount>>;
    async fn cgpa_by_dept(&self) -> anyhow::Result<Vec<DeptCgpas>>;
}

#[async_trait]
impl ChartSource for PgPool {
    async fn convocation_counts(
        &self,
        dept: Department,
    ) -> anyhow::Result<Vec<ConvocationValue<i64>>> {
        db::convocation_counts(self, dept).await
    }

    async fn convocation_cgpa(
        &self,
        dept: Department,
    ) -> anyhow::Result<Vec<ConvocationValue<f64>>> {
        db::convocation_cgpa(self, dept).await
    }

    async fn cgpa_stats_by_dept(&self) -> anyhow::Result<Vec<DeptCgpaStats>> {
        db::cgpa_stats_by_dept(self).await
    }

    async fn count_by_dept(&self) -> anyhow::Result<Vec<DeptCount>> {
        db::count_by_dept(self).await
    }

    async fn cgpa_by_dept(&self) -> anyhow::Result<Vec<DeptCgpas>> {
        db::cgpa_by_dept(self).await
    }
}

#[derive(Debug)]
pub struct ChartPanel {
    pub id: &'static str,
    pub option: Result<Value, String>,
}

async fn panel<F>(id: &'static str, build: F) -> ChartPanel
where
    F: Future<Output = anyhow::Result<Value>>,
{
    let option = build.await.map_err(|err| {
        let message = format!("{err:#}");
        warn!(chart = id, error = %message, "chart failed to load");
        message
    });
    ChartPanel { id, option }
}

/// Loads every chart group concurrently. A failing group only blanks its own
/// panel.
pub async fn load_charts<S>(source: &S, dept: Department) -> Vec<ChartPanel>
where
    S: ChartSource + Sync + ?Sized,
{
    let (convocation, cgpa, stats, count, distribution) = tokio::join!(
        panel("convocationChart", async {
            anyhow::Ok(convocation_pie(&source.convocation_counts(dept).await?))
        }),
        panel("cgpaChart", async {
            anyhow::Ok(convocation_cgpa_bar(&source.convocation_cgpa(dept).await?))
        }),
        panel("avgCgpaDeptChart", async {
            anyhow::Ok(dept_stats_bar(&source.cgpa_stats_by_dept().await?))
        }),
        panel("countDeptChart", async {
            anyhow::Ok(dept_count_pie(&source.count_by_dept().await?))
        }),
        panel("cgpaDeptChart", async {
            anyhow::Ok(cgpa_distribution_lines(&source.cgpa_by_dept().await?))
        }),
    );

    vec![convocation, cgpa, stats, count, distribution]
}

pub fn convocation_pie(rows: &[ConvocationValue<i64>]) -> Value {
    let merged =
        shape::merge_categories(rows.iter().map(|r| (r.convocation.clone(), r.value)));
    json!({
        "tooltip": { "trigger": "item" },
        "series": [{ "type": "pie", "radius": "60%", "data": merged }]
    })
}

pub fn convocation_cgpa_bar(rows: &[ConvocationValue<f64>]) -> Value {
    let averaged =
        shape::average_by_category(rows.iter().map(|r| (r.convocation.clone(), r.value)));
    let labels: Vec<&str> = averaged.iter().map(|c| c.name.as_str()).collect();
    let values: Vec<f64> = averaged.iter().map(|c| shape::round2(c.value)).collect();
    json!({
        "tooltip": { "trigger": "axis" },
        "xAxis": { "type": "category", "data": labels },
        "yAxis": { "type": "value" },
        "series": [{ "type": "bar", "data": values }]
    })
}

pub fn dept_stats_bar(rows: &[DeptCgpaStats]) -> Value {
    let series = [
        ("Avg CGPA", "#3b82f6", rows.iter().map(|d| d.avg_cgpa).collect::<Vec<_>>()),
        ("Min CGPA", "#10b981", rows.iter().map(|d| d.min_cgpa).collect()),
        ("Max CGPA", "#f59e0b", rows.iter().map(|d| d.max_cgpa).collect()),
    ];
    json!({
        "tooltip": { "trigger": "axis" },
        "legend": { "data": series.iter().map(|(name, _, _)| *name).collect::<Vec<_>>() },
        "xAxis": {
            "type": "category",
            "data": rows.iter().map(|d| d.department.as_str()).collect::<Vec<_>>()
        },
        "yAxis": { "type": "value" },
        "series": series
            .iter()
            .map(|(name, color, data)| json!({
                "name": name,
                "type": "bar",
                "data": data,
                "itemStyle": { "color": color }
            }))
            .collect::<Vec<_>>()
    })
}

pub fn dept_count_pie(rows: &[DeptCount]) -> Value {
    let data: Vec<Value> = rows
        .iter()
        .map(|d| json!({ "name": d.department, "value": d.count }))
        .collect();
    json!({
        "tooltip": { "trigger": "item" },
        "series": [{ "type": "pie", "radius": "60%", "data": data }]
    })
}

pub fn cgpa_distribution_lines(rows: &[DeptCgpas]) -> Value {
    let spec = HistogramSpec::CGPA;
    let histograms = shape::histogram_by_category(
        &spec,
        rows.iter().map(|d| (d.department.as_str(), d.cgpas.as_slice())),
    );
    json!({
        "tooltip": { "trigger": "axis" },
        "legend": { "data": rows.iter().map(|d| d.department.as_str()).collect::<Vec<_>>() },
        "xAxis": { "type": "category", "data": spec.labels() },
        "yAxis": { "type": "value" },
        "series": histograms
            .into_iter()
            .map(|h| json!({ "name": h.name, "type": "line", "smooth": true, "data": h.value }))
            .collect::<Vec<_>>()
    })
}

/// Chart id to option object, or `{ "error": ... }` for a failed group.
pub fn to_document(panels: &[ChartPanel]) -> Value {
    let mut doc = Map::new();
    for panel in panels {
        let entry = match &panel.option {
            Ok(option) => option.clone(),
            Err(message) => json!({ "error": message }),
        };
        doc.insert(panel.id.to_string(), entry);
    }
    Value::Object(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource {
        fail_counts: bool,
    }

    #[async_trait]
    impl ChartSource for FakeSource {
        async fn convocation_counts(
            &self,
            _dept: Department,
        ) -> anyhow::Result<Vec<ConvocationValue<i64>>> {
            if self.fail_counts {
                anyhow::bail!("connection reset");
            }
            Ok(vec![
                ConvocationValue {
                    convocation: "5th".to_string(),
                    value: 4,
                },
                ConvocationValue {
                    convocation: "5th ".to_string(),
                    value: 2,
                },
            ])
        }

        async fn convocation_cgpa(
            &self,
            _dept: Department,
        ) -> anyhow::Result<Vec<ConvocationValue<f64>>> {
            Ok(vec![
                ConvocationValue {
                    convocation: " 4th".to_string(),
                    value: 3.1,
                },
                ConvocationValue {
                    convocation: "4th".to_string(),
                    value: 3.4,
                },
            ])
        }

        async fn cgpa_stats_by_dept(&self) -> anyhow::Result<Vec<DeptCgpaStats>> {
            Ok(Department::ALL
                .iter()
                .map(|d| DeptCgpaStats {
                    department: d.label(),
                    avg_cgpa: 3.2,
                    min_cgpa: 2.5,
                    max_cgpa: 3.9,
                })
                .collect())
        }

        async fn count_by_dept(&self) -> anyhow::Result<Vec<DeptCount>> {
            anyhow::bail!("timeout")
        }

        async fn cgpa_by_dept(&self) -> anyhow::Result<Vec<DeptCgpas>> {
            Ok(vec![DeptCgpas {
                department: "EEE".to_string(),
                cgpas: vec![2.0, 2.04, 2.05, 3.99, 4.0],
            }])
        }
    }

    #[tokio::test]
    async fn one_failing_group_does_not_block_the_others() {
        let panels = load_charts(&FakeSource { fail_counts: true }, Department::Eee).await;
        let ids: Vec<&str> = panels.iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            ["convocationChart", "cgpaChart", "avgCgpaDeptChart", "countDeptChart", "cgpaDeptChart"]
        );

        assert_eq!(panels[0].option.as_ref().unwrap_err(), "connection reset");
        assert!(panels[1].option.is_ok());
        assert!(panels[2].option.is_ok());
        assert_eq!(panels[3].option.as_ref().unwrap_err(), "timeout");
        assert!(panels[4].option.is_ok());
    }

    #[tokio::test]
    async fn convocation_pie_merges_whitespace_duplicates() {
        let panels = load_charts(&FakeSource { fail_counts: false }, Department::Eee).await;
        let option = panels[0].option.as_ref().unwrap();
        assert_eq!(
            option["series"][0]["data"],
            json!([{ "name": "5th", "value": 6 }])
        );
    }

    #[test]
    fn cgpa_bar_rounds_recombined_averages() {
        let option = convocation_cgpa_bar(&[
            ConvocationValue {
                convocation: " 4th".to_string(),
                value: 3.1,
            },
            ConvocationValue {
                convocation: "4th".to_string(),
                value: 3.5,
            },
        ]);
        assert_eq!(option["xAxis"]["data"], json!(["4th"]));
        assert_eq!(option["series"][0]["data"], json!([3.3]));
    }

    #[test]
    fn distribution_uses_forty_labelled_bins() {
        let option = cgpa_distribution_lines(&[DeptCgpas {
            department: "EEE".to_string(),
            cgpas: vec![2.0, 2.04, 2.05, 3.99, 4.0],
        }]);
        assert_eq!(option["xAxis"]["data"].as_array().unwrap().len(), 40);
        let data = option["series"][0]["data"].as_array().unwrap();
        assert_eq!(data[0], 2);
        assert_eq!(data[1], 1);
        assert_eq!(data[39], 1);
    }

    #[test]
    fn stats_bar_has_one_category_per_department() {
        let rows: Vec<DeptCgpaStats> = Department::ALL
            .iter()
            .map(|d| DeptCgpaStats {
                department: d.label(),
                avg_cgpa: 0.0,
                min_cgpa: 0.0,
                max_cgpa: 0.0,
            })
            .collect();
        let option = dept_stats_bar(&rows);
        assert_eq!(
            option["xAxis"]["data"],
            json!(["EEE", "CSE", "MECHA", "CIVIL", "IPE", "BBA", "TEXTILE", "ARCH"])
        );
        assert_eq!(option["series"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn document_reports_errors_in_place() {
        let panels = vec![
            ChartPanel {
                id: "countDeptChart",
                option: Err("timeout".to_string()),
            },
            ChartPanel {
                id: "cgpaChart",
                option: Ok(json!({ "series": [] })),
            },
        ];
        let doc = to_document(&panels);
        assert_eq!(doc["countDeptChart"], json!({ "error": "timeout" }));
        assert_eq!(doc["cgpaChart"], json!({ "series": [] }));
    }
}
