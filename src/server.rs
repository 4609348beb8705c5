use actix_web::http::StatusCode;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, info};

use crate::db;
use crate::filter::{GraduateParams, QueryFilter};
use crate::models::{ConvocationValue, Department, GraduatePage};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The message is what the caller sees; the source is only logged.
    #[error("{message}")]
    Database {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ApiError {
    fn database(message: &'static str) -> impl FnOnce(anyhow::Error) -> ApiError {
        move |source| {
            error!(error = %format!("{source:#}"), "{message}");
            ApiError::Database { message, source }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

async fn list_graduates(
    pool: web::Data<PgPool>,
    dept: web::Path<String>,
    params: web::Query<GraduateParams>,
) -> Result<HttpResponse, ApiError> {
    let filter = QueryFilter::from_params(&params);
    let Ok(dept) = dept.parse::<Department>() else {
        return Ok(HttpResponse::Ok().json(GraduatePage::empty(filter.page)));
    };

    let page = db::fetch_graduates(&pool, dept, &filter)
        .await
        .map_err(ApiError::database("Database query failed"))?;
    Ok(HttpResponse::Ok().json(page))
}

async fn convocation_chart(
    pool: web::Data<PgPool>,
    dept: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let Ok(dept) = dept.parse::<Department>() else {
        return Ok(HttpResponse::Ok().json(Vec::<ConvocationValue<i64>>::new()));
    };

    let rows = db::convocation_counts(&pool, dept)
        .await
        .map_err(ApiError::database("Failed convocation chart"))?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn cgpa_chart(
    pool: web::Data<PgPool>,
    dept: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let Ok(dept) = dept.parse::<Department>() else {
        return Ok(HttpResponse::Ok().json(Vec::<ConvocationValue<f64>>::new()));
    };

    let rows = db::convocation_cgpa(&pool, dept)
        .await
        .map_err(ApiError::database("Failed cgpa chart"))?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn cgpa_stats_by_dept(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let rows = db::cgpa_stats_by_dept(&pool)
        .await
        .map_err(ApiError::database("Failed to fetch CGPA stats per department"))?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn count_by_dept(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let rows = db::count_by_dept(&pool)
        .await
        .map_err(ApiError::database("Failed to fetch count by department"))?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn cgpa_by_dept(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let rows = db::cgpa_by_dept(&pool)
        .await
        .map_err(ApiError::database("Failed to fetch cgpa by department"))?;
    Ok(HttpResponse::Ok().json(rows))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/graduates")
            .route("/chart/cgpa-stats-by-dept", web::get().to(cgpa_stats_by_dept))
            .route("/chart/count-by-dept", web::get().to(count_by_dept))
            .route("/chart/cgpa-by-dept", web::get().to(cgpa_by_dept))
            .route("/{dept}/chart/convocation", web::get().to(convocation_chart))
            .route("/{dept}/chart/cgpa", web::get().to(cgpa_chart))
            .route("/{dept}", web::get().to(list_graduates)),
    );
}

/// Serves until shutdown, then closes the pool.
pub async fn run(pool: PgPool, host: &str, port: u16) -> anyhow::Result<()> {
    let data = web::Data::new(pool.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(Logger::default())
            .configure(routes)
    })
    .bind((host, port))?;

    info!(host, port, "graduates api listening");
    server.run().await?;

    pool.close().await;
    info!("connection pool closed");
    Ok(())
}
