use crate::gemini::{gen_error_response, GenError, GeminiClient, Part};
use crate::types::{FinalizeScriptRequest, Page};
use crate::users;
use crate::{projects, s3};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{http::StatusCode, Body, Error, Response};

pub fn character_analysis_prompt() -> &'static str {
    "Describe this picture-book character so that an illustrator could redraw \
     them consistently on every page: species or kind, colors, proportions, \
     clothing, and distinguishing features. Answer with the description only."
}

pub fn style_analysis_prompt() -> &'static str {
    "Describe the visual style of this image (medium, palette, linework, \
     mood) so that an illustrator could paint new scenes in the same style. \
     Answer with the description only."
}

pub fn visual_script_prompt(
    pages: &[Page],
    character_description: &str,
    style_description: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "Write one visual prompt per page of this children's picture book: a \
         single sentence describing the scene to illustrate, naming the \
         character's action, the setting, and the mood. Keep the character \
         consistent with this description on every page.\n\n",
    );
    prompt.push_str(&format!("Character: {}\n", character_description));
    if let Some(style) = style_description {
        prompt.push_str(&format!("Style: {}\n", style));
    }
    prompt.push_str("\nPages:\n");
    for page in pages {
        prompt.push_str(&format!("{}. {}\n", page.page_no, page.text));
    }
    prompt
}

/// Response schema: one visual prompt per page number.
pub fn visual_script_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "page_no": { "type": "integer" },
                "visual_prompt": { "type": "string" }
            },
            "required": ["page_no", "visual_prompt"]
        }
    })
}

#[derive(Debug, serde::Deserialize)]
pub struct PagePrompt {
    pub page_no: u32,
    pub visual_prompt: String,
}

pub fn parse_page_prompts(raw: &str) -> Result<Vec<PagePrompt>, GenError> {
    serde_json::from_str(raw).map_err(|e| GenError::Format(e.to_string()))
}

/// Attach prompts to pages by page number. Every page must be covered.
pub fn apply_page_prompts(pages: &mut [Page], prompts: &[PagePrompt]) -> Result<(), GenError> {
    for page in pages.iter_mut() {
        let prompt = prompts
            .iter()
            .find(|p| p.page_no == page.page_no)
            .ok_or_else(|| {
                GenError::Format(format!("missing visual prompt for page {}", page.page_no))
            })?;
        page.visual_prompt = Some(prompt.visual_prompt.clone());
    }
    Ok(())
}

/// Stage 3: derive a canonical character description from the confirmed seed
/// image, optionally analyze a style reference, then produce one visual
/// prompt per page consistent with both.
pub async fn finalize_script(
    client: &DynamoClient,
    s3_client: &S3Client,
    gemini: &GeminiClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: FinalizeScriptRequest = if body.is_empty() {
        FinalizeScriptRequest {
            style_reference: None,
        }
    } else {
        serde_json::from_slice(body)?
    };

    let Some(mut project) =
        projects::load_owned_project(client, table_name, project_id, user_id).await?
    else {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(
                serde_json::json!({"error": "Project not found"})
                    .to_string()
                    .into(),
            )
            .map_err(Box::new)?);
    };

    let bad_request = |message: &str| -> Result<Response<Body>, Error> {
        Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(serde_json::json!({ "error": message }).to_string().into())
            .map_err(Box::new)?)
    };

    if project.pages.is_empty() {
        return bad_request("Generate an outline before finalizing the script");
    }
    let Some(seed_url) = project.character_image_url.clone() else {
        return bad_request("Confirm a character before finalizing the script");
    };

    let bucket = s3::bucket_name();
    let Some(seed_key) = s3::key_for_url(&bucket, &seed_url) else {
        return bad_request("Character seed image is not stored in this project");
    };

    if let Err(e) = users::deduct_coins(client, table_name, user_id, users::SCRIPT_COST).await {
        return users::coin_error_response(e);
    }

    // Analyze the seed image into a redrawable character description.
    let seed_b64 = s3::get_object_b64(s3_client, &bucket, &seed_key).await?;
    let character_description = match gemini
        .generate_text(vec![
            Part::text(character_analysis_prompt()),
            Part::inline_image("image/png", seed_b64.clone()),
        ])
        .await
    {
        Ok(description) => description,
        Err(e) => {
            users::refund_coins(client, table_name, user_id, users::SCRIPT_COST).await;
            return gen_error_response(e);
        }
    };

    // Optional style reference: stored alongside the project, then analyzed.
    let mut style_reference_url = None;
    let mut style_description = project.style_description.clone();
    if let Some(reference) = req.style_reference {
        let extension = crate::character::extension_for_mime(&reference.mime_type);
        let key = s3::object_key(user_id, project_id, &format!("style-reference.{}", extension));
        let bytes = match crate::gemini::decode_image(&reference.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                users::refund_coins(client, table_name, user_id, users::SCRIPT_COST).await;
                return gen_error_response(e);
            }
        };
        let url = s3::put_object(s3_client, &bucket, &key, bytes, &reference.mime_type).await?;
        style_reference_url = Some(url);

        match gemini
            .generate_text(vec![
                Part::text(style_analysis_prompt()),
                Part::inline_image(reference.mime_type, reference.data),
            ])
            .await
        {
            Ok(description) => style_description = Some(description),
            Err(e) => {
                users::refund_coins(client, table_name, user_id, users::SCRIPT_COST).await;
                return gen_error_response(e);
            }
        }
    }

    // Per-page visual prompts consistent with character and style.
    let script_outcome = match gemini
        .generate_json(
            vec![Part::text(visual_script_prompt(
                &project.pages,
                &character_description,
                style_description.as_deref(),
            ))],
            visual_script_schema(),
        )
        .await
    {
        Ok(raw) => parse_page_prompts(&raw)
            .and_then(|prompts| apply_page_prompts(&mut project.pages, &prompts)),
        Err(e) => Err(e),
    };

    if let Err(e) = script_outcome {
        users::refund_coins(client, table_name, user_id, users::SCRIPT_COST).await;
        return gen_error_response(e);
    }

    project.character_description = Some(character_description.clone());
    if let Some(url) = &style_reference_url {
        project.style_reference_url = Some(url.clone());
    }
    project.style_description = style_description.clone();

    let pk = format!("PROJECT#{}", project_id);
    let mut update_expr = vec![
        "character_description = :character".to_string(),
        "pages = :pages".to_string(),
    ];
    let mut builder = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .expression_attribute_values(
            ":character",
            AttributeValue::S(character_description),
        )
        .expression_attribute_values(
            ":pages",
            AttributeValue::S(serde_json::to_string(&project.pages)?),
        );
    if let Some(url) = style_reference_url {
        update_expr.push("style_reference_url = :style_url".to_string());
        builder = builder.expression_attribute_values(":style_url", AttributeValue::S(url));
    }
    if let Some(description) = style_description {
        update_expr.push("style_description = :style".to_string());
        builder = builder.expression_attribute_values(":style", AttributeValue::S(description));
    }
    builder
        .update_expression(format!("SET {}", update_expr.join(", ")))
        .send()
        .await?;

    tracing::info!("Visual script finalized for project {}", project_id);

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
    use crate::types::PageKind;

    fn page(id: &str, page_no: u32) -> Page {
        Page {
            page_id: id.to_string(),
            kind: PageKind::Story,
            page_no,
            text: format!("text {}", page_no),
            visual_prompt: None,
            image_url: None,
            preview_url: None,
            generating: false,
        }
    }

    #[test]
    fn prompts_attach_by_page_number() {
        let mut pages = vec![page("a", 1), page("b", 2)];
        let prompts = parse_page_prompts(
            r#"[
                {"page_no": 2, "visual_prompt": "hamster at the river"},
                {"page_no": 1, "visual_prompt": "hamster at home"}
            ]"#,
        )
        .unwrap();

        apply_page_prompts(&mut pages, &prompts).unwrap();
        assert_eq!(pages[0].visual_prompt.as_deref(), Some("hamster at home"));
        assert_eq!(
            pages[1].visual_prompt.as_deref(),
            Some("hamster at the river")
        );
    }

    #[test]
    fn uncovered_page_fails_the_stage() {
        let mut pages = vec![page("a", 1), page("b", 2)];
        let prompts =
            parse_page_prompts(r#"[{"page_no": 1, "visual_prompt": "only one"}]"#).unwrap();
        assert!(matches!(
            apply_page_prompts(&mut pages, &prompts),
            Err(GenError::Format(_))
        ));
    }

    #[test]
    fn non_json_script_is_a_format_error() {
        assert!(matches!(
            parse_page_prompts("no prompts today"),
            Err(GenError::Format(_))
        ));
    }

    #[test]
    fn script_prompt_lists_every_page() {
        let pages = vec![page("a", 1), page("b", 2)];
        let prompt = visual_script_prompt(&pages, "a hamster in a red scarf", None);
        assert!(prompt.contains("1. text 1"));
        assert!(prompt.contains("2. text 2"));
        assert!(prompt.contains("a hamster in a red scarf"));
    }
}
