use crate::gemini::{decode_image, gen_error_response, GeminiClient, Part};
use crate::types::{EditPageRequest, Page, RenderPageRequest};
use crate::users;
use crate::{character, previews, projects, s3};
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{http::StatusCode, Body, Error, Response};

pub fn render_prompt(visual_prompt: &str, style_description: Option<&str>) -> String {
    let mut prompt = format!(
        "Illustrate this children's picture-book scene: {}. Keep the character \
         exactly consistent with the reference image. No text or lettering in \
         the illustration.",
        visual_prompt
    );
    if let Some(style) = style_description {
        prompt.push_str(&format!(" Art style: {}.", style));
    }
    prompt
}

pub fn edit_prompt(instruction: &str) -> String {
    format!(
        "Modify the first image according to this instruction, changing nothing \
         else: {}. Keep the character consistent with the reference image.",
        instruction
    )
}

fn error_response(
    status: StatusCode,
    code: &str,
    message: &str,
) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({"error": code, "message": message})
                .to_string()
                .into(),
        )
        .map_err(Box::new)?)
}

/// Store a freshly generated page image (plus preview when warranted) and
/// return (image_url, preview_url).
async fn store_page_image(
    s3_client: &S3Client,
    bucket: &str,
    user_id: &str,
    project_id: &str,
    page_id: &str,
    mime_type: &str,
    bytes: Vec<u8>,
) -> Result<(String, Option<String>), Error> {
    let extension = character::extension_for_mime(mime_type);
    let key = s3::object_key(
        user_id,
        project_id,
        &format!("page-{}.{}", page_id, extension),
    );

    let mut preview_url = None;
    match previews::get_dimensions(&bytes) {
        Ok((width, height)) if previews::needs_preview(bytes.len(), width, height) => {
            match previews::generate_preview(&bytes) {
                Ok((_, _, jpeg)) => {
                    let preview_key = s3::object_key(
                        user_id,
                        project_id,
                        &format!("page-{}-preview.jpg", page_id),
                    );
                    preview_url = Some(
                        s3::put_object(s3_client, bucket, &preview_key, jpeg, "image/jpeg")
                            .await?,
                    );
                }
                Err(e) => tracing::warn!("Preview generation failed for {}: {}", page_id, e),
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not read dimensions for {}: {}", page_id, e),
    }

    let url = s3::put_object(s3_client, bucket, &key, bytes, mime_type).await?;
    Ok((url, preview_url))
}

async fn respond_with_page(
    s3_client: &S3Client,
    bucket: &str,
    page: &Page,
) -> Result<Response<Body>, Error> {
    let download_url = match page
        .image_url
        .as_deref()
        .and_then(|url| s3::key_for_url(bucket, url))
    {
        Some(key) => Some(s3::presigned_download_url(s3_client, bucket, &key).await?),
        None => None,
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({
                "page": page,
                "download_url": download_url,
            })
            .to_string()
            .into(),
        )
        .map_err(Box::new)?)
}

/// Stage 4: render one page's illustration from the character seed image,
/// the style description, and the page's visual prompt. An existing
/// illustration is only replaced when the request explicitly asks for a
/// redraw.
pub async fn render_page(
    client: &DynamoClient,
    s3_client: &S3Client,
    gemini: &GeminiClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    page_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: RenderPageRequest = if body.is_empty() {
        RenderPageRequest { redraw: false }
    } else {
        serde_json::from_slice(body)?
    };

    let Some(mut project) =
        projects::load_owned_project(client, table_name, project_id, user_id).await?
    else {
        return error_response(StatusCode::NOT_FOUND, "NotFound", "Project not found");
    };

    let Some(page_index) = project.pages.iter().position(|p| p.page_id == page_id) else {
        return error_response(StatusCode::NOT_FOUND, "NotFound", "Page not found");
    };

    if project.pages[page_index].image_url.is_some() && !req.redraw {
        return error_response(
            StatusCode::CONFLICT,
            "PageAlreadyIllustrated",
            "Page already has an illustration; pass redraw to replace it",
        );
    }

    let Some(visual_prompt) = project.pages[page_index].visual_prompt.clone() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "MissingVisualPrompt",
            "Finalize the visual script before rendering pages",
        );
    };

    if let Err(e) = users::deduct_coins(client, table_name, user_id, users::RENDER_COST).await {
        return users::coin_error_response(e);
    }

    let bucket = s3::bucket_name();

    let mut parts = vec![Part::text(render_prompt(
        &visual_prompt,
        project.style_description.as_deref(),
    ))];
    if let Some(seed_key) = project
        .character_image_url
        .as_deref()
        .and_then(|url| s3::key_for_url(&bucket, url))
    {
        let seed_b64 = s3::get_object_b64(s3_client, &bucket, &seed_key).await?;
        parts.push(Part::inline_image("image/png", seed_b64));
    }

    let image = match gemini.generate_image(parts).await {
        Ok(image) => image,
        Err(e) => {
            users::refund_coins(client, table_name, user_id, users::RENDER_COST).await;
            return gen_error_response(e);
        }
    };
    let bytes = match decode_image(&image.data) {
        Ok(bytes) => bytes,
        Err(e) => {
            users::refund_coins(client, table_name, user_id, users::RENDER_COST).await;
            return gen_error_response(e);
        }
    };

    let (url, preview_url) = store_page_image(
        s3_client,
        &bucket,
        user_id,
        project_id,
        page_id,
        &image.mime_type,
        bytes,
    )
    .await?;

    project.pages[page_index].image_url = Some(url);
    project.pages[page_index].preview_url = preview_url;
    projects::save_pages(client, table_name, project_id, &project.pages).await?;

    tracing::info!("Rendered page {} of project {}", page_id, project_id);

    respond_with_page(s3_client, &bucket, &project.pages[page_index]).await
}

/// Stage 5: edit an illustrated page with a free-text instruction,
/// conditioned on the current image and the character seed.
pub async fn edit_page(
    client: &DynamoClient,
    s3_client: &S3Client,
    gemini: &GeminiClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    page_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: EditPageRequest = serde_json::from_slice(body)?;
    if req.instruction.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "InvalidRequest",
            "Edit instruction must not be empty",
        );
    }

    let Some(mut project) =
        projects::load_owned_project(client, table_name, project_id, user_id).await?
    else {
        return error_response(StatusCode::NOT_FOUND, "NotFound", "Project not found");
    };

    let Some(page_index) = project.pages.iter().position(|p| p.page_id == page_id) else {
        return error_response(StatusCode::NOT_FOUND, "NotFound", "Page not found");
    };

    let bucket = s3::bucket_name();
    let Some(current_key) = project.pages[page_index]
        .image_url
        .as_deref()
        .and_then(|url| s3::key_for_url(&bucket, url))
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "NoImageToEdit",
            "Render the page before editing it",
        );
    };

    if let Err(e) = users::deduct_coins(client, table_name, user_id, users::EDIT_COST).await {
        return users::coin_error_response(e);
    }

    let current_b64 = s3::get_object_b64(s3_client, &bucket, &current_key).await?;
    let mut parts = vec![
        Part::text(edit_prompt(&req.instruction)),
        Part::inline_image("image/png", current_b64),
    ];
    if let Some(seed_key) = project
        .character_image_url
        .as_deref()
        .and_then(|url| s3::key_for_url(&bucket, url))
    {
        let seed_b64 = s3::get_object_b64(s3_client, &bucket, &seed_key).await?;
        parts.push(Part::inline_image("image/png", seed_b64));
    }

    let image = match gemini.generate_image(parts).await {
        Ok(image) => image,
        Err(e) => {
            users::refund_coins(client, table_name, user_id, users::EDIT_COST).await;
            return gen_error_response(e);
        }
    };
    let bytes = match decode_image(&image.data) {
        Ok(bytes) => bytes,
        Err(e) => {
            users::refund_coins(client, table_name, user_id, users::EDIT_COST).await;
            return gen_error_response(e);
        }
    };

    let (url, preview_url) = store_page_image(
        s3_client,
        &bucket,
        user_id,
        project_id,
        page_id,
        &image.mime_type,
        bytes,
    )
    .await?;

    project.pages[page_index].image_url = Some(url);
    project.pages[page_index].preview_url = preview_url;
    projects::save_pages(client, table_name, project_id, &project.pages).await?;

    tracing::info!("Edited page {} of project {}", page_id, project_id);

    respond_with_page(s3_client, &bucket, &project.pages[page_index]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_prompt_carries_scene_and_style() {
        let prompt = render_prompt("the hamster crosses a rope bridge", Some("soft watercolor"));
        assert!(prompt.contains("the hamster crosses a rope bridge"));
        assert!(prompt.contains("soft watercolor"));
        assert!(!render_prompt("x", None).contains("Art style"));
    }

    #[test]
    fn edit_prompt_quotes_the_instruction() {
        assert!(edit_prompt("make the sky pink").contains("make the sky pink"));
    }
}
