//! OpenAPI document, served by Scalar at `/docs` and as JSON at `/api-docs/openapi.json`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;
use crate::errors::ErrorBody;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "Manuscript service token. Include it in the `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer YOUR_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    paths(
        api::handlers::uploads::upload_file,
        api::handlers::depositions::create_deposition,
        api::handlers::depositions::get_deposition,
        api::handlers::depositions::update_deposition,
        api::handlers::depositions::create_version,
    ),
    components(
        schemas(
            api::models::depositions::ResourceDescriptor,
            api::models::depositions::DepositionLinks,
            api::models::depositions::FileRecord,
            api::models::depositions::UploadResponse,
            api::models::depositions::PartialUpload,
            ErrorBody,
        )
    ),
    tags(
        (name = "uploads", description = "Stream files into a deposition's storage bucket. \
Files are checked against the size limit before anything is sent to the archive, and a transfer is abandoned if the client disconnects."),
        (name = "depositions", description = "Create, read, update and version archive depositions."),
    ),
    info(
        title = "depogate",
        description = "Gateway in front of the manuscript service and the data archive.",
    )
)]
pub struct ApiDoc;
