use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use std::env;
use std::sync::Arc;
use storynest_shared::{
    character, orders, outline, projects, redemptions, s3, scene, script, users, AppState,
};

fn not_found() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::json!({"error": "Not found"}).to_string().into())
        .map_err(Box::new)?)
}

/// Identity comes from the gateway's JWT authorizer. In local development an
/// X-User-Id header overrides it.
fn user_id_from(event: &Request) -> String {
    event
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            event
                .request_context()
                .authorizer()
                .and_then(|auth| auth.jwt.as_ref())
                .and_then(|jwt| jwt.claims.get("sub"))
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| {
            tracing::warn!("Could not extract user ID from JWT or header, using fallback");
            "local-dev-user".to_string()
        })
}

/// Main Lambda handler - routes requests to the persistence and generation
/// endpoints
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == "OPTIONS" {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header(
                "Access-Control-Allow-Methods",
                "GET,POST,PUT,PATCH,DELETE,OPTIONS",
            )
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type,Authorization,X-User-Id",
            )
            .body(Body::Empty)
            .map_err(Box::new)?);
    }

    let table_name = env::var("TABLE_NAME").unwrap_or_else(|_| "storynest".to_string());
    let user_id = user_id_from(&event);
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, parts.as_slice()) {
        // --- USERS ---
        // POST /users - create profile record after signup
        (&Method::POST, ["users"]) => {
            users::create_user(&state.dynamo_client, &table_name, &user_id, body).await
        }
        // GET /users/me - fetch profile
        (&Method::GET, ["users", "me"]) => {
            users::get_user(&state.dynamo_client, &table_name, &user_id).await
        }
        // PATCH /users/me - update profile
        (&Method::PATCH, ["users", "me"]) => {
            users::update_user(&state.dynamo_client, &table_name, &user_id, body).await
        }

        // --- COINS ---
        // POST /redeem - redeem a coin code
        (&Method::POST, ["redeem"]) => {
            redemptions::redeem_code(&state.dynamo_client, &table_name, &user_id, body).await
        }

        // --- PROJECTS ---
        // POST /projects - create project
        (&Method::POST, ["projects"]) => {
            projects::create_project(&state.dynamo_client, &table_name, &user_id, body).await
        }
        // GET /projects - list user's projects
        (&Method::GET, ["projects"]) => {
            projects::list_user_projects(&state.dynamo_client, &table_name, &user_id).await
        }
        // GET /projects/{id} - get project
        (&Method::GET, ["projects", project_id]) => {
            projects::get_project(&state.dynamo_client, &table_name, &user_id, project_id).await
        }
        // PATCH /projects/{id} - merge-update project
        (&Method::PATCH, ["projects", project_id]) => {
            projects::update_project(&state.dynamo_client, &table_name, &user_id, project_id, body)
                .await
        }
        // DELETE /projects/{id} - delete project and stored images
        (&Method::DELETE, ["projects", project_id]) => {
            projects::delete_project(
                &state.dynamo_client,
                &state.s3_client,
                &table_name,
                &user_id,
                project_id,
            )
            .await
        }

        // --- GENERATION PIPELINE ---
        // POST /projects/{id}/outline - stage 1: outline
        (&Method::POST, ["projects", project_id, "outline"]) => {
            outline::generate_outline(
                &state.dynamo_client,
                &state.gemini,
                &table_name,
                &user_id,
                project_id,
                body,
            )
            .await
        }
        // POST /projects/{id}/characters - stage 2: character variants
        (&Method::POST, ["projects", project_id, "characters"]) => {
            character::generate_characters(
                &state.dynamo_client,
                &state.s3_client,
                &state.gemini,
                &table_name,
                &user_id,
                project_id,
                body,
            )
            .await
        }
        // POST /projects/{id}/characters/confirm - pick the seed image
        (&Method::POST, ["projects", project_id, "characters", "confirm"]) => {
            character::confirm_character(
                &state.dynamo_client,
                &table_name,
                &user_id,
                project_id,
                body,
            )
            .await
        }
        // POST /projects/{id}/script - stage 3: visual script
        (&Method::POST, ["projects", project_id, "script"]) => {
            script::finalize_script(
                &state.dynamo_client,
                &state.s3_client,
                &state.gemini,
                &table_name,
                &user_id,
                project_id,
                body,
            )
            .await
        }

        // --- PAGES ---
        // POST /projects/{id}/pages - director mode: add story page
        (&Method::POST, ["projects", project_id, "pages"]) => {
            projects::add_page(&state.dynamo_client, &table_name, &user_id, project_id, body).await
        }
        // PATCH /projects/{id}/pages - director mode: reorder story pages
        (&Method::PATCH, ["projects", project_id, "pages"]) => {
            projects::reorder_pages(&state.dynamo_client, &table_name, &user_id, project_id, body)
                .await
        }
        // POST /projects/{id}/pages/{pid}/render - stage 4: render scene
        (&Method::POST, ["projects", project_id, "pages", page_id, "render"]) => {
            scene::render_page(
                &state.dynamo_client,
                &state.s3_client,
                &state.gemini,
                &table_name,
                &user_id,
                project_id,
                page_id,
                body,
            )
            .await
        }
        // POST /projects/{id}/pages/{pid}/edit - stage 5: edit scene
        (&Method::POST, ["projects", project_id, "pages", page_id, "edit"]) => {
            scene::edit_page(
                &state.dynamo_client,
                &state.s3_client,
                &state.gemini,
                &table_name,
                &user_id,
                project_id,
                page_id,
                body,
            )
            .await
        }

        // --- IMAGES ---
        // POST /projects/{id}/images - upload a reference image
        (&Method::POST, ["projects", project_id, "images"]) => {
            s3::upload_reference_image(&state.s3_client, &user_id, project_id, body).await
        }

        // --- ORDERS ---
        // POST /projects/{id}/order - order the finished book
        (&Method::POST, ["projects", project_id, "order"]) => {
            orders::create_order(
                &state.dynamo_client,
                &state.s3_client,
                &table_name,
                &user_id,
                project_id,
            )
            .await
        }
        // GET /orders/{code} - resolve an extraction code
        (&Method::GET, ["orders", code]) => {
            orders::get_order(&state.dynamo_client, &state.s3_client, &table_name, code).await
        }

        _ => not_found(),
    }
}
