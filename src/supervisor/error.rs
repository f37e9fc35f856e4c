//! Supervisor 전용 에러 타입 — 에러 종류를 구분하여 IPC 핸들러에서
//! 적절한 HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

/// Supervisor 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Module '{0}' is not configured")]
    ModuleNotFound(String),

    #[error("Server for '{0}' is not running")]
    NotRunning(String),

    #[error("Duplicate module '{0}' in server registry")]
    DuplicateModule(String),

    #[error("Port {port} is configured for both '{first}' and '{second}'")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },

    #[error("Invalid port for module '{0}': port must be nonzero")]
    InvalidPort(String),

    #[error("Failed to spawn server for '{module}': {source}")]
    SpawnFailed {
        module: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ModuleNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotRunning(_) => StatusCode::CONFLICT,
            Self::DuplicateModule(_) | Self::DuplicatePort { .. } | Self::InvalidPort(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SpawnFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ModuleNotFound(_) => "MODULE_NOT_FOUND",
            Self::NotRunning(_) => "NOT_RUNNING",
            Self::DuplicateModule(_) => "DUPLICATE_MODULE",
            Self::DuplicatePort { .. } => "DUPLICATE_PORT",
            Self::InvalidPort(_) => "INVALID_PORT",
            Self::SpawnFailed { .. } => "SPAWN_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// axum 핸들러에서 SupervisorError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for SupervisorError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}
