/*
    Copyright 2024 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! API resources

use actix_web::http::StatusCode;
use actix_web::web::Data;
use actix_web::{get, Error, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;

/// HTTP response body object for the [get_services] resource.
#[derive(ToSchema, Serialize)]
struct ServicesResponse {
    /// The currently active virtual servers, in emission order.
    #[schema(value_type = Object)]
    services: serde_json::Value,
    /// Milliseconds since Unix Epoch of the last confirmed document write.
    last_write: u64,
}

/// Return the virtual-server document as last derived from cluster state.
/// Inactive entries are omitted, matching what the writer receives.
#[utoipa::path(
    responses(
        (status = 200, description = "Up", body = inline(ServicesResponse), content_type = "application/json",),
    ),
)]
#[get("/services")]
pub async fn get_services(app_state: Data<AppState>) -> Result<HttpResponse, Error> {
    let document = app_state.manager.active_document();
    let response = ServicesResponse {
        services: document["services"].clone(),
        last_write: app_state.manager.last_write_millis(),
    };
    log::trace!(
        "GET /services -> body: {}",
        serde_json::to_string_pretty(&response.services).unwrap()
    );
    Ok(HttpResponse::build(StatusCode::OK).json(response))
}
