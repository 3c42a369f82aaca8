//! Generic error handler: every [`AppError`] that escapes a route ends here.

use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use tracing::error;
use uuid::Uuid;

use super::views;
use crate::error::AppError;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        error!(request_id = %request_id, "Request failed: {}", self);

        (
            self.status_code(),
            [(header::CACHE_CONTROL, "no-store")],
            Html(views::error_page(self.user_message(), &request_id)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, AuthError};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_error_renders_friendly_page() {
        let response =
            AppError::Api(ApiError::GraphRequestFailed("HTTP 500: secret body".into()))
                .into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("An error occurred while processing your request."));
        assert!(body.contains("Request ID"));
        assert!(!body.contains("secret body"));
    }

    #[test]
    fn test_missing_role_is_forbidden() {
        let response = AppError::Auth(AuthError::MissingRole("App.Role.2".into())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
