use std::sync::Arc;

use actix_web::{HttpResponse, ResponseError, Result, http::StatusCode, web};
use appointment_cache::TraceId;
use tracing::error;

use crate::poll_cycle::AppointmentPoller;

/// Failure of a manually triggered cycle, reported with its trace id only.
///
/// The detailed errors are logged under the same trace id.
#[derive(Debug, thiserror::Error)]
#[error("An error occurred processing appointments. (Reference trace log id: {trace})")]
pub struct TriggerError {
    trace: TraceId,
}

impl ResponseError for TriggerError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError()
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

/// Runs one poll cycle and answers with a plain-text summary
pub async fn trigger_appointments(
    poller: web::Data<Arc<AppointmentPoller>>,
) -> Result<HttpResponse, TriggerError> {
    let trace = TraceId::generate();

    match poller.run_cycle(&trace).await {
        Ok(report) if report.is_complete() => Ok(HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(report.summary())),
        Ok(report) => {
            for failure in &report.failures {
                error!(
                    trace_id = %trace,
                    "Triggered cycle failed for {}: {}",
                    failure.window,
                    failure.error
                );
            }
            Err(TriggerError { trace })
        }
        Err(e) => {
            error!(trace_id = %trace, "Triggered cycle failed: {}", e);
            Err(TriggerError { trace })
        }
    }
}

/// Liveness check
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Register the HTTP routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/appointments")
            .route(web::get().to(trigger_appointments))
            .route(web::post().to(trigger_appointments)),
    )
    .route("/health", web::get().to(health));
}

#[cfg(test)]
mod tests {
    use actix_web::{App, test};
    use appointment_cache::testing::{MemoryStore, slot_at};
    use chrono::{NaiveDate, NaiveDateTime};
    use ttp_scheduler::SourceError;

    use super::*;
    use crate::config::PollerConfig;
    use crate::poll_cycle::fakes::{FixedProvider, ScriptedSource};

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 9)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn poller(responses: Vec<Result<Vec<appointment_cache::Slot>, SourceError>>) -> Arc<AppointmentPoller> {
        Arc::new(
            AppointmentPoller::new(
                Arc::new(ScriptedSource::new(responses)),
                Arc::new(FixedProvider(Some(Arc::new(MemoryStore::new())))),
                None,
                PollerConfig::default(),
                256 * 1024,
            )
            .with_clock(fixed_now),
        )
    }

    #[actix_web::test]
    async fn test_trigger_reports_open_slots() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(poller(vec![Ok(vec![slot_at(
                    5020,
                    "2024-07-10T08:00:00",
                    1,
                )])])))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/appointments").to_request();
        let body = test::call_and_read_body(&app, req).await;

        assert!(
            String::from_utf8(body.to_vec())
                .unwrap()
                .starts_with("One appointment found within the next 7 days:")
        );
    }

    #[actix_web::test]
    async fn test_trigger_without_slots() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(poller(Vec::new())))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/appointments").to_request();
        let body = test::call_and_read_body(&app, req).await;

        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "No appointments available for the next 7 days as of 7-9-2024 12:00:00 PM."
        );
    }

    #[actix_web::test]
    async fn test_trigger_failure_returns_trace_reference() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(poller(vec![Err(SourceError::RateLimited)])))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/appointments").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with(
            "An error occurred processing appointments. (Reference trace log id: "
        ));
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
