use crate::gemini::{gen_error_response, GenError, GeminiClient, Part};
use crate::projects;
use crate::types::{GenerateOutlineRequest, Page, PageKind, WorkflowStep};
use crate::users;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};

/// Target page count requested from the model: cover + 10 story + back.
pub const OUTLINE_PAGE_COUNT: usize = 12;

#[derive(Debug, serde::Deserialize)]
pub struct OutlineDraft {
    pub title: String,
    #[serde(default)]
    pub pages: Vec<OutlineDraftPage>,
}

#[derive(Debug, serde::Deserialize)]
pub struct OutlineDraftPage {
    pub kind: PageKind,
    pub text: String,
}

/// Response schema sent with the outline request.
pub fn outline_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "pages": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "kind": { "type": "string", "enum": ["cover", "story", "back"] },
                        "text": { "type": "string" }
                    },
                    "required": ["kind", "text"]
                }
            }
        },
        "required": ["title", "pages"]
    })
}

pub fn outline_prompt(idea: &str, template: Option<&str>) -> String {
    let mut prompt = format!(
        "You are writing a children's picture book. Based on the story idea below, \
         produce a book outline with a title and exactly {} pages: the first page is \
         the front cover (kind \"cover\"), the last page is the back cover (kind \
         \"back\"), and every page in between is a story page (kind \"story\"). Each \
         page carries 1-3 short sentences of narrative text suited to ages 3-8.\n\n\
         Story idea: {}",
        OUTLINE_PAGE_COUNT, idea
    );
    if let Some(template) = template {
        prompt.push_str(&format!("\nStory template: {}", template));
    }
    prompt
}

pub fn parse_outline(raw: &str) -> Result<OutlineDraft, GenError> {
    serde_json::from_str(raw).map_err(|e| GenError::Format(e.to_string()))
}

/// Enforce the requested shape: exactly one cover first, exactly one back
/// last, story pages in between, numbered 1..n. Extra covers/backs are
/// demoted to story pages; a missing cover or back fails the stage.
pub fn normalize_pages(draft: OutlineDraft) -> Result<(String, Vec<Page>), GenError> {
    if draft.pages.is_empty() {
        return Err(GenError::Empty);
    }

    let mut cover = None;
    let mut back = None;
    let mut story = Vec::new();

    for page in draft.pages {
        match page.kind {
            PageKind::Cover if cover.is_none() => cover = Some(page.text),
            PageKind::Back => {
                // keep the last back page, demote earlier ones
                if let Some(previous) = back.replace(page.text) {
                    story.push(previous);
                }
            }
            _ => story.push(page.text),
        }
    }

    let Some(cover_text) = cover else {
        return Err(GenError::Format("outline has no cover page".to_string()));
    };
    let Some(back_text) = back else {
        return Err(GenError::Format("outline has no back page".to_string()));
    };

    let new_page = |kind: PageKind, text: String| Page {
        page_id: uuid::Uuid::new_v4().to_string(),
        kind,
        page_no: 0,
        text,
        visual_prompt: None,
        image_url: None,
        preview_url: None,
        generating: false,
    };

    let mut pages = Vec::with_capacity(story.len() + 2);
    pages.push(new_page(PageKind::Cover, cover_text));
    for text in story {
        pages.push(new_page(PageKind::Story, text));
    }
    pages.push(new_page(PageKind::Back, back_text));
    projects::renumber_pages(&mut pages);

    Ok((draft.title, pages))
}

/// Stage 1: generate the book outline from the project's idea, replacing any
/// previous outline, and advance the workflow to character selection.
pub async fn generate_outline(
    client: &DynamoClient,
    gemini: &GeminiClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: GenerateOutlineRequest = if body.is_empty() {
        GenerateOutlineRequest {
            reference_image: None,
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

    if let Err(e) = users::deduct_coins(client, table_name, user_id, users::OUTLINE_COST).await {
        return users::coin_error_response(e);
    }

    let mut parts = vec![Part::text(outline_prompt(
        &project.idea,
        project.template.as_deref(),
    ))];
    if let Some(reference) = req.reference_image {
        parts.push(Part::inline_image(reference.mime_type, reference.data));
    }

    let outcome = match gemini.generate_json(parts, outline_schema()).await {
        Ok(raw) => parse_outline(&raw).and_then(normalize_pages),
        Err(e) => Err(e),
    };

    let (title, pages) = match outcome {
        Ok(result) => result,
        Err(e) => {
            users::refund_coins(client, table_name, user_id, users::OUTLINE_COST).await;
            return gen_error_response(e);
        }
    };

    if project.title.trim().is_empty() {
        project.title = title;
    }
    project.pages = pages;
    project.current_step = WorkflowStep::Character;

    let pk = format!("PROJECT#{}", project_id);
    client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("SET title = :title, pages = :pages, current_step = :step")
        .expression_attribute_values(":title", AttributeValue::S(project.title.clone()))
        .expression_attribute_values(
            ":pages",
            AttributeValue::S(serde_json::to_string(&project.pages)?),
        )
        .expression_attribute_values(
            ":step",
            AttributeValue::S(project.current_step.as_str().to_string()),
        )
        .send()
        .await?;

    tracing::info!(
        "Outline generated for project {}: {} pages",
        project_id,
        project.pages.len()
    );

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
    fn well_shaped_outline_normalizes_in_order() {
        let raw = r#"{
            "title": "The Brave Hamster",
            "pages": [
                {"kind": "cover", "text": "The Brave Hamster"},
                {"kind": "story", "text": "Once upon a time..."},
                {"kind": "story", "text": "Hazel packed her satchel."},
                {"kind": "back", "text": "The End"}
            ]
        }"#;
        let (title, pages) = normalize_pages(parse_outline(raw).unwrap()).unwrap();

        assert_eq!(title, "The Brave Hamster");
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[0].kind, PageKind::Cover);
        assert_eq!(pages[3].kind, PageKind::Back);
        assert!(pages[1..3].iter().all(|p| p.kind == PageKind::Story));
        assert_eq!(
            pages.iter().map(|p| p.page_no).collect::<Vec<_>>(),
            [1, 2, 3, 4]
        );
    }

    #[test]
    fn extra_covers_and_backs_are_demoted_to_story() {
        let raw = r#"{
            "title": "T",
            "pages": [
                {"kind": "cover", "text": "front"},
                {"kind": "cover", "text": "second cover"},
                {"kind": "back", "text": "early back"},
                {"kind": "story", "text": "middle"},
                {"kind": "back", "text": "real back"}
            ]
        }"#;
        let (_, pages) = normalize_pages(parse_outline(raw).unwrap()).unwrap();

        let covers = pages.iter().filter(|p| p.kind == PageKind::Cover).count();
        let backs = pages.iter().filter(|p| p.kind == PageKind::Back).count();
        assert_eq!((covers, backs), (1, 1));
        assert_eq!(pages[0].text, "front");
        assert_eq!(pages.last().unwrap().text, "real back");
    }

    #[test]
    fn missing_cover_or_back_fails_the_stage() {
        let no_cover = r#"{"title": "T", "pages": [{"kind": "story", "text": "a"}, {"kind": "back", "text": "b"}]}"#;
        assert!(matches!(
            normalize_pages(parse_outline(no_cover).unwrap()),
            Err(GenError::Format(_))
        ));

        let no_back = r#"{"title": "T", "pages": [{"kind": "cover", "text": "a"}, {"kind": "story", "text": "b"}]}"#;
        assert!(matches!(
            normalize_pages(parse_outline(no_back).unwrap()),
            Err(GenError::Format(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_format_error() {
        assert!(matches!(
            parse_outline("Sure! Here's your outline: ..."),
            Err(GenError::Format(_))
        ));
    }

    #[test]
    fn empty_page_list_is_an_empty_result() {
        let raw = r#"{"title": "T", "pages": []}"#;
        assert!(matches!(
            normalize_pages(parse_outline(raw).unwrap()),
            Err(GenError::Empty)
        ));
    }

    #[test]
    fn prompt_carries_idea_and_template() {
        let prompt = outline_prompt("a brave hamster", Some("bedtime"));
        assert!(prompt.contains("a brave hamster"));
        assert!(prompt.contains("bedtime"));
        assert!(prompt.contains("12"));
    }
}
