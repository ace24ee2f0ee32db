/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::toolbox::api::types::ErrorBody;
use crate::toolbox::cluster::ClusterResource;
use crate::toolbox::lifecycle::LifecycleError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    existing: Option<Vec<ClusterResource>>,
}

impl ApiError {
    pub(super) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            existing: None,
        }
    }

    pub(super) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        match err {
            LifecycleError::Conflict { existing, .. } => Self {
                status: StatusCode::CONFLICT,
                message,
                existing: Some(existing),
            },
            LifecycleError::InvalidConfig(_) | LifecycleError::InvalidRequest(_) => {
                Self::bad_request(message)
            }
            LifecycleError::Template(_) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, message),
            LifecycleError::CollaboratorUnavailable(_) => {
                Self::new(StatusCode::BAD_GATEWAY, message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            existing: self.existing,
        });
        (self.status, body).into_response()
    }
}
