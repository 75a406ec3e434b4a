use crate::gemini::{decode_image, gen_error_response, GeminiClient, Part};
use crate::types::{ConfirmCharacterRequest, GenerateCharactersRequest, WorkflowStep};
use crate::users;
use crate::{projects, s3};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{http::StatusCode, Body, Error, Response};

pub const DEFAULT_CHARACTER_VARIANTS: usize = 3;
pub const MAX_CHARACTER_VARIANTS: usize = 6;

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

pub fn character_prompt(description: &str, style: Option<&str>, variant: usize) -> String {
    let mut prompt = format!(
        "Design the main character of a children's picture book: {}. Full-body \
         character sheet on a plain white background, friendly and expressive, \
         suitable for ages 3-8. Variant {}: use a distinct pose and outfit from \
         the other variants.",
        description,
        variant + 1
    );
    if let Some(style) = style {
        prompt.push_str(&format!(" Art style: {}.", style));
    }
    prompt
}

#[derive(serde::Serialize)]
struct CharacterOption {
    url: String,
    download_url: String,
}

fn project_not_found() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({"error": "Project not found"})
                .to_string()
                .into(),
        )
        .map_err(Box::new)?)
}

/// Stage 2: synthesize character variants from the user's description and
/// optional reference photos. Variants are generated one request at a time;
/// the whole stage fails (and refunds) on the first bad response.
pub async fn generate_characters(
    client: &DynamoClient,
    s3_client: &S3Client,
    gemini: &GeminiClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: GenerateCharactersRequest = serde_json::from_slice(body)?;

    if req.description.trim().is_empty() {
        return Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(
                serde_json::json!({"error": "Character description must not be empty"})
                    .to_string()
                    .into(),
            )
            .map_err(Box::new)?);
    }

    let Some(project) =
        projects::load_owned_project(client, table_name, project_id, user_id).await?
    else {
        return project_not_found();
    };

    if let Err(e) = users::deduct_coins(client, table_name, user_id, users::CHARACTER_COST).await {
        return users::coin_error_response(e);
    }

    let count = req
        .count
        .unwrap_or(DEFAULT_CHARACTER_VARIANTS)
        .clamp(1, MAX_CHARACTER_VARIANTS);
    let batch = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let bucket = s3::bucket_name();

    let mut options = Vec::with_capacity(count);
    for variant in 0..count {
        let mut parts = vec![Part::text(character_prompt(
            &req.description,
            project.style.as_deref(),
            variant,
        ))];
        for reference in &req.reference_images {
            parts.push(Part::inline_image(
                reference.mime_type.clone(),
                reference.data.clone(),
            ));
        }

        let image = match gemini.generate_image(parts).await {
            Ok(image) => image,
            Err(e) => {
                users::refund_coins(client, table_name, user_id, users::CHARACTER_COST).await;
                return gen_error_response(e);
            }
        };

        let bytes = match decode_image(&image.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                users::refund_coins(client, table_name, user_id, users::CHARACTER_COST).await;
                return gen_error_response(e);
            }
        };

        let file_name = format!(
            "character-{}-{}.{}",
            batch,
            variant,
            extension_for_mime(&image.mime_type)
        );
        let key = s3::object_key(user_id, project_id, &file_name);
        let url = s3::put_object(s3_client, &bucket, &key, bytes, &image.mime_type).await?;
        let download_url = s3::presigned_download_url(s3_client, &bucket, &key).await?;

        options.push(CharacterOption { url, download_url });
    }

    projects::set_project_field(
        client,
        table_name,
        project_id,
        "character_description",
        &req.description,
    )
    .await?;

    tracing::info!(
        "Generated {} character variants for project {}",
        options.len(),
        project_id
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({
                "description": req.description,
                "options": options,
            })
            .to_string()
            .into(),
        )
        .map_err(Box::new)?)
}

/// Confirm the chosen variant as the character seed image and advance the
/// workflow from character selection to director mode.
pub async fn confirm_character(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: ConfirmCharacterRequest = serde_json::from_slice(body)?;

    let Some(mut project) =
        projects::load_owned_project(client, table_name, project_id, user_id).await?
    else {
        return project_not_found();
    };

    project.character_image_url = Some(req.image_url.clone());
    if project.current_step == WorkflowStep::Character {
        project.current_step = WorkflowStep::Director;
    }

    let pk = format!("PROJECT#{}", project_id);
    client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("SET character_image_url = :url, current_step = :step")
        .expression_attribute_values(":url", AttributeValue::S(req.image_url))
        .expression_attribute_values(
            ":step",
            AttributeValue::S(project.current_step.as_str().to_string()),
        )
        .send()
        .await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(&project)?.into())
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_prompts_differ_and_carry_the_style() {
        let a = character_prompt("a brave hamster", Some("watercolor"), 0);
        let b = character_prompt("a brave hamster", Some("watercolor"), 1);
        assert_ne!(a, b);
        assert!(a.contains("a brave hamster"));
        assert!(a.contains("watercolor"));
        assert!(!character_prompt("x", None, 0).contains("Art style"));
    }

    #[test]
    fn mime_types_map_to_extensions() {
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/webp"), "webp");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }
}
