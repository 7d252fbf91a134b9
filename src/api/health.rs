use actix_web::{web, HttpResponse};
use serde::Serialize;

use super::error::ApiError;
use super::shared::ApiResponse;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/healthcheck").route(web::get().to(health_check)));
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    timestamp: String,
}

async fn health_check() -> Result<HttpResponse, ApiError> {
    Ok(ApiResponse::ok(
        "Health check passed",
        Health {
            status: "OK",
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
    .into_response())
}

#[cfg(test)]
mod tests {
    use crate::api::testing::test_app;
    use actix_web::http::StatusCode;
    use actix_web::test;

    #[actix_web::test]
    async fn healthcheck_reports_ok_in_the_envelope() {
        let app = test::init_service(test_app()).await;
        let req = test::TestRequest::get().uri("/api/v1/healthcheck").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["statusCode"], 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "OK");
        assert!(body["data"]["timestamp"].is_string());
    }
}
