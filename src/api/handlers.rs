//! HTTP request handlers

use super::types::{EnviarMensajeRequest, ErrorResponse, EstadoResponse, SuccessResponse};
use super::AppState;
use crate::dispatch::{MessageSession, SendOutcome};
use crate::session::SessionFactory;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

const MISSING_FIELDS: &str = "Número y mensaje son requeridos.";
const NO_SESSIONS: &str = "No hay sesiones activas.";
const INTERNAL_ERROR: &str = "Error interno del servidor.";

/// Create the API router
pub fn create_router<F>(state: AppState<F>) -> Router
where
    F: SessionFactory,
    F::Session: MessageSession,
{
    Router::new()
        .route("/enviar-mensaje", post(enviar_mensaje::<F>))
        .route("/estado", get(estado::<F>))
        .route("/version", get(get_version))
        .with_state(state)
}

async fn enviar_mensaje<F>(
    State(state): State<AppState<F>>,
    Json(request): Json<EnviarMensajeRequest>,
) -> Result<Response, AppError>
where
    F: SessionFactory,
    F::Session: MessageSession,
{
    let (telefono, mensaje) = match (
        request.telefono.filter(|t| !t.trim().is_empty()),
        request.mensaje.filter(|m| !m.trim().is_empty()),
    ) {
        (Some(telefono), Some(mensaje)) => (telefono, mensaje),
        _ => return Err(AppError::BadRequest(MISSING_FIELDS.to_string())),
    };

    match state.dispatcher.send(&telefono, &mensaje).await {
        Ok(SendOutcome::Sent) => Ok(Json(SuccessResponse { success: true }).into_response()),
        // Not ready yet: a soft payload, not an HTTP error.
        Ok(SendOutcome::NoActiveSessions) => {
            Ok(Json(ErrorResponse::new(NO_SESSIONS)).into_response())
        }
        Err(e) => {
            tracing::error!(telefono, error = %e, "dispatch failed");
            Err(AppError::Internal(INTERNAL_ERROR.to_string()))
        }
    }
}

async fn estado<F>(State(state): State<AppState<F>>) -> Json<EstadoResponse>
where
    F: SessionFactory,
{
    Json(EstadoResponse {
        sesiones: state.supervisor.active_sessions().await,
    })
}

async fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================
// Error handling
// ============================================================

enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::{DeliverError, Dispatcher};
    use crate::session::testing::{ScriptedSession, StubFactory};
    use crate::session::SessionSupervisor;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(max_attempts: u32) -> AppState<StubFactory> {
        let config = Config {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts,
            ..Config::default()
        };
        let supervisor = SessionSupervisor::new(StubFactory::reliable(), 100);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&supervisor), &config));
        AppState {
            supervisor,
            dispatcher,
        }
    }

    fn send_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/enviar-mensaje")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_with_400() {
        let app = create_router(test_state(1));
        let response = app
            .oneshot(send_request(r#"{"telefono":"5551234"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Número y mensaje son requeridos.");
    }

    #[tokio::test]
    async fn empty_fields_count_as_missing() {
        let app = create_router(test_state(1));
        let response = app
            .oneshot(send_request(r#"{"telefono":"  ","mensaje":"hola"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_pool_maps_to_the_soft_error_payload() {
        let app = create_router(test_state(1));
        let response = app
            .oneshot(send_request(r#"{"telefono":"5551234","mensaje":"hola"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["error"], "No hay sesiones activas.");
    }

    #[tokio::test]
    async fn successful_dispatch_returns_success_true() {
        let state = test_state(1);
        state.supervisor.adopt(ScriptedSession::default()).await;
        let app = create_router(state);

        let response = app
            .oneshot(send_request(r#"{"telefono":"5551234","mensaje":"hola"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn exhausted_dispatch_maps_to_500() {
        let state = test_state(1);
        state
            .supervisor
            .adopt(ScriptedSession::with_script(vec![Err(
                DeliverError::ComposeTimeout(Duration::ZERO),
            )]))
            .await;
        let app = create_router(state);

        let response = app
            .oneshot(send_request(r#"{"telefono":"5551234","mensaje":"hola"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Error interno del servidor.");
    }

    #[tokio::test]
    async fn estado_reports_the_pool_size() {
        let state = test_state(1);
        state.supervisor.adopt(ScriptedSession::default()).await;
        state.supervisor.adopt(ScriptedSession::default()).await;
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/estado")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["sesiones"], 2);
    }

    #[tokio::test]
    async fn version_returns_the_crate_version() {
        let app = create_router(test_state(1));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/version")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, env!("CARGO_PKG_VERSION").as_bytes());
    }
}
