use crate::types::{
    AddPageRequest, CreateProjectRequest, Page, PageKind, Project, ReorderPagesRequest,
    UpdateProjectRequest, WorkflowStep,
};
use crate::s3;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;

fn project_from_item(project_id: &str, item: &HashMap<String, AttributeValue>) -> Project {
    let get_s = |name: &str| {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
    };

    Project {
        project_id: project_id.to_string(),
        owner_id: get_s("owner_id").unwrap_or_default(),
        title: get_s("title").unwrap_or_default(),
        idea: get_s("idea").unwrap_or_default(),
        template: get_s("template"),
        pages: get_s("pages")
            .map(|s| serde_json::from_str(&s).unwrap_or_default())
            .unwrap_or_default(),
        character_description: get_s("character_description"),
        character_image_url: get_s("character_image_url"),
        style: get_s("style"),
        style_reference_url: get_s("style_reference_url"),
        style_description: get_s("style_description"),
        extraction_code: get_s("extraction_code"),
        current_step: get_s("current_step")
            .and_then(|s| WorkflowStep::parse(&s))
            .unwrap_or(WorkflowStep::Idea),
        created_at: get_s("created_at").unwrap_or_default(),
    }
}

/// Load a project record. Pipeline stages and order creation go through this
/// before touching anything else.
pub async fn load_project(
    client: &DynamoClient,
    table_name: &str,
    project_id: &str,
) -> Result<Option<Project>, Error> {
    let pk = format!("PROJECT#{}", project_id);

    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .send()
        .await?;

    Ok(result
        .item()
        .map(|item| project_from_item(project_id, item)))
}

/// Persist the pages document after a pipeline stage or director-mode edit.
pub async fn save_pages(
    client: &DynamoClient,
    table_name: &str,
    project_id: &str,
    pages: &[Page],
) -> Result<(), Error> {
    let pk = format!("PROJECT#{}", project_id);

    client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("SET pages = :pages")
        .expression_attribute_values(":pages", AttributeValue::S(serde_json::to_string(pages)?))
        .send()
        .await?;

    Ok(())
}

/// Set a single string field on the project record.
pub async fn set_project_field(
    client: &DynamoClient,
    table_name: &str,
    project_id: &str,
    field: &str,
    value: &str,
) -> Result<(), Error> {
    let pk = format!("PROJECT#{}", project_id);

    client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("SET #field = :value")
        .expression_attribute_names("#field", field)
        .expression_attribute_values(":value", AttributeValue::S(value.to_string()))
        .send()
        .await?;

    Ok(())
}

/// Renumber pages sequentially (1-based) in their current order.
pub fn renumber_pages(pages: &mut [Page]) {
    for (index, page) in pages.iter_mut().enumerate() {
        page.page_no = (index + 1) as u32;
    }
}

/// Rebuild the page sequence from a requested story-page ordering. Cover and
/// back keep their slots; the request must name every story page exactly once.
pub fn apply_reorder(pages: Vec<Page>, story_order: &[String]) -> Result<Vec<Page>, String> {
    let mut cover = None;
    let mut back = None;
    let mut story: HashMap<String, Page> = HashMap::new();

    for page in pages {
        match page.kind {
            PageKind::Cover => cover = Some(page),
            PageKind::Back => back = Some(page),
            PageKind::Story => {
                story.insert(page.page_id.clone(), page);
            }
        }
    }

    if story_order.len() != story.len() {
        return Err(format!(
            "Expected {} story page ids, got {}",
            story.len(),
            story_order.len()
        ));
    }

    let mut reordered = Vec::with_capacity(story_order.len() + 2);
    if let Some(cover) = cover {
        reordered.push(cover);
    }
    for page_id in story_order {
        let page = story
            .remove(page_id)
            .ok_or_else(|| format!("Unknown or duplicate page id: {}", page_id))?;
        reordered.push(page);
    }
    if let Some(back) = back {
        reordered.push(back);
    }

    renumber_pages(&mut reordered);
    Ok(reordered)
}

fn bad_request(message: String) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::json!({ "error": message }).to_string().into())
        .map_err(Box::new)?)
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

fn ok_project(project: &Project) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(project)?.into())
        .map_err(Box::new)?)
}

/// Load a project and check ownership. A foreign project reads as absent.
pub async fn load_owned_project(
    client: &DynamoClient,
    table_name: &str,
    project_id: &str,
    user_id: &str,
) -> Result<Option<Project>, Error> {
    let project = load_project(client, table_name, project_id).await?;
    Ok(project.filter(|p| p.owner_id == user_id))
}

/// Create a new project
pub async fn create_project(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateProjectRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("[CREATE] Parse error: {}", e);
            return bad_request(format!("Invalid request body: {}", e));
        }
    };

    if req.idea.trim().is_empty() {
        return bad_request("Project must have an idea".to_string());
    }

    let project_id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let pk = format!("PROJECT#{}", project_id);
    let user_pk = format!("USER#{}", user_id);
    let project_sk = format!("PROJECT#{}", project_id);

    // 1. Project record
    let mut project_item = HashMap::new();
    project_item.insert("PK".to_string(), AttributeValue::S(pk.clone()));
    project_item.insert("SK".to_string(), AttributeValue::S(pk.clone()));
    project_item.insert("owner_id".to_string(), AttributeValue::S(user_id.to_string()));
    project_item.insert("title".to_string(), AttributeValue::S(req.title.clone()));
    project_item.insert("idea".to_string(), AttributeValue::S(req.idea.clone()));
    if let Some(template) = &req.template {
        project_item.insert("template".to_string(), AttributeValue::S(template.clone()));
    }
    if let Some(style) = &req.style {
        project_item.insert("style".to_string(), AttributeValue::S(style.clone()));
    }
    project_item.insert("pages".to_string(), AttributeValue::S("[]".to_string()));
    project_item.insert(
        "current_step".to_string(),
        AttributeValue::S(WorkflowStep::Idea.as_str().to_string()),
    );
    project_item.insert("created_at".to_string(), AttributeValue::S(now.clone()));

    // 2. USER -> PROJECT link
    let mut user_to_project = HashMap::new();
    user_to_project.insert("PK".to_string(), AttributeValue::S(user_pk.clone()));
    user_to_project.insert("SK".to_string(), AttributeValue::S(project_sk.clone()));
    user_to_project.insert("created_at".to_string(), AttributeValue::S(now.clone()));

    // 3. PROJECT -> USER link
    let mut project_to_user = HashMap::new();
    project_to_user.insert("PK".to_string(), AttributeValue::S(project_sk));
    project_to_user.insert("SK".to_string(), AttributeValue::S(user_pk));
    project_to_user.insert("created_at".to_string(), AttributeValue::S(now.clone()));

    client
        .batch_write_item()
        .request_items(
            table_name,
            vec![
                aws_sdk_dynamodb::types::WriteRequest::builder()
                    .put_request(
                        aws_sdk_dynamodb::types::PutRequest::builder()
                            .set_item(Some(project_item))
                            .build()
                            .map_err(|e| format!("Failed to build put request: {:?}", e))?,
                    )
                    .build(),
                aws_sdk_dynamodb::types::WriteRequest::builder()
                    .put_request(
                        aws_sdk_dynamodb::types::PutRequest::builder()
                            .set_item(Some(user_to_project))
                            .build()
                            .map_err(|e| format!("Failed to build put request: {:?}", e))?,
                    )
                    .build(),
                aws_sdk_dynamodb::types::WriteRequest::builder()
                    .put_request(
                        aws_sdk_dynamodb::types::PutRequest::builder()
                            .set_item(Some(project_to_user))
                            .build()
                            .map_err(|e| format!("Failed to build put request: {:?}", e))?,
                    )
                    .build(),
            ],
        )
        .send()
        .await?;

    let project = Project {
        project_id,
        owner_id: user_id.to_string(),
        title: req.title,
        idea: req.idea,
        template: req.template,
        pages: Vec::new(),
        character_description: None,
        character_image_url: None,
        style: req.style,
        style_reference_url: None,
        style_description: None,
        extraction_code: None,
        current_step: WorkflowStep::Idea,
        created_at: now,
    };

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(&project)?.into())
        .map_err(Box::new)?)
}

/// Get a specific project
pub async fn get_project(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    match load_owned_project(client, table_name, project_id, user_id).await? {
        Some(project) => ok_project(&project),
        None => project_not_found(),
    }
}

/// List all projects owned by a user
pub async fn list_user_projects(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let pk = format!("USER#{}", user_id);

    let result = client
        .query()
        .table_name(table_name)
        .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
        .expression_attribute_values(":pk", AttributeValue::S(pk))
        .expression_attribute_values(
            ":sk_prefix",
            AttributeValue::S("PROJECT#".to_string()),
        )
        .send()
        .await?;

    let mut project_ids = Vec::new();
    for item in result.items() {
        if let Some(sk) = item.get("SK").and_then(|v| v.as_s().ok()) {
            if let Some(project_id) = sk.strip_prefix("PROJECT#") {
                project_ids.push(project_id.to_string());
            }
        }
    }

    let mut projects = Vec::new();
    if project_ids.is_empty() {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(serde_json::to_string(&projects)?.into())
            .map_err(Box::new)?);
    }

    // Batch fetch project records (DynamoDB allows up to 100 items per batch)
    for chunk in project_ids.chunks(100) {
        let mut keys = Vec::new();
        for project_id in chunk {
            let pk = format!("PROJECT#{}", project_id);
            let mut key = HashMap::new();
            key.insert("PK".to_string(), AttributeValue::S(pk.clone()));
            key.insert("SK".to_string(), AttributeValue::S(pk));
            keys.push(key);
        }

        let batch_result = client
            .batch_get_item()
            .request_items(
                table_name,
                aws_sdk_dynamodb::types::KeysAndAttributes::builder()
                    .set_keys(Some(keys))
                    .build()
                    .map_err(|e| format!("Failed to build batch get: {:?}", e))?,
            )
            .send()
            .await?;

        if let Some(responses) = batch_result.responses() {
            if let Some(items) = responses.get(table_name) {
                for item in items {
                    if let Some(pk) = item.get("PK").and_then(|v| v.as_s().ok()) {
                        if let Some(project_id) = pk.strip_prefix("PROJECT#") {
                            projects.push(project_from_item(project_id, item));
                        }
                    }
                }
            }
        }
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(&projects)?.into())
        .map_err(Box::new)?)
}

/// Merge-update a project. Every update from the UI lands here as an upsert
/// of whichever fields changed.
pub async fn update_project(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateProjectRequest = serde_json::from_slice(body)?;

    if load_owned_project(client, table_name, project_id, user_id)
        .await?
        .is_none()
    {
        return project_not_found();
    }

    let pk = format!("PROJECT#{}", project_id);

    let mut update_expr = vec![];
    let mut expr_names = HashMap::new();
    let mut expr_values = HashMap::new();

    let mut set_string = |field: &str, value: String| {
        let name_key = format!("#{}", field);
        let value_key = format!(":{}", field);
        expr_names.insert(name_key.clone(), field.to_string());
        expr_values.insert(value_key.clone(), AttributeValue::S(value));
        format!("{} = {}", name_key, value_key)
    };

    if let Some(title) = req.title {
        update_expr.push(set_string("title", title));
    }
    if let Some(idea) = req.idea {
        update_expr.push(set_string("idea", idea));
    }
    if let Some(template) = req.template {
        update_expr.push(set_string("template", template));
    }
    if let Some(style) = req.style {
        update_expr.push(set_string("style", style));
    }
    if let Some(style_reference_url) = req.style_reference_url {
        update_expr.push(set_string("style_reference_url", style_reference_url));
    }
    if let Some(style_description) = req.style_description {
        update_expr.push(set_string("style_description", style_description));
    }
    if let Some(character_description) = req.character_description {
        update_expr.push(set_string("character_description", character_description));
    }
    if let Some(character_image_url) = req.character_image_url {
        update_expr.push(set_string("character_image_url", character_image_url));
    }
    if let Some(mut pages) = req.pages {
        renumber_pages(&mut pages);
        update_expr.push(set_string("pages", serde_json::to_string(&pages)?));
    }
    if let Some(step) = req.current_step {
        update_expr.push(set_string("current_step", step.as_str().to_string()));
    }

    if !update_expr.is_empty() {
        let mut builder = client
            .update_item()
            .table_name(table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .update_expression(format!("SET {}", update_expr.join(", ")));

        for (k, v) in expr_names {
            builder = builder.expression_attribute_names(k, v);
        }
        for (k, v) in expr_values {
            builder = builder.expression_attribute_values(k, v);
        }

        builder.send().await?;
    }

    get_project(client, table_name, user_id, project_id).await
}

/// Delete a project, its link records, and its S3 prefix
pub async fn delete_project(
    client: &DynamoClient,
    s3_client: &S3Client,
    table_name: &str,
    user_id: &str,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    if load_owned_project(client, table_name, project_id, user_id)
        .await?
        .is_none()
    {
        return project_not_found();
    }

    let pk = format!("PROJECT#{}", project_id);
    let user_pk = format!("USER#{}", user_id);

    let mut delete_keys = Vec::new();
    for (key_pk, key_sk) in [
        (pk.clone(), pk.clone()),
        (user_pk.clone(), pk.clone()),
        (pk.clone(), user_pk),
    ] {
        let mut key = HashMap::new();
        key.insert("PK".to_string(), AttributeValue::S(key_pk));
        key.insert("SK".to_string(), AttributeValue::S(key_sk));
        delete_keys.push(key);
    }

    let delete_requests: Vec<_> = delete_keys
        .into_iter()
        .map(|key| {
            aws_sdk_dynamodb::types::WriteRequest::builder()
                .delete_request(
                    aws_sdk_dynamodb::types::DeleteRequest::builder()
                        .set_key(Some(key))
                        .build()
                        .expect("delete request key is always set"),
                )
                .build()
        })
        .collect();

    client
        .batch_write_item()
        .request_items(table_name, delete_requests)
        .send()
        .await?;

    let bucket = s3::bucket_name();
    s3::delete_project_prefix(s3_client, &bucket, user_id, project_id)
        .await
        .ok();

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// Director mode: append a story page (optionally after a specific page)
pub async fn add_page(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: AddPageRequest = serde_json::from_slice(body)?;

    let Some(mut project) =
        load_owned_project(client, table_name, project_id, user_id).await?
    else {
        return project_not_found();
    };

    let page = Page {
        page_id: uuid::Uuid::new_v4().to_string(),
        kind: PageKind::Story,
        page_no: 0, // assigned by renumbering
        text: req.text,
        visual_prompt: req.visual_prompt,
        image_url: None,
        preview_url: None,
        generating: false,
    };

    let insert_at = match &req.after_page_id {
        Some(after_id) => {
            match project.pages.iter().position(|p| &p.page_id == after_id) {
                Some(index) => index + 1,
                None => return bad_request(format!("Unknown page id: {}", after_id)),
            }
        }
        // Before the back cover when present, else at the end
        None => project
            .pages
            .iter()
            .position(|p| p.kind == PageKind::Back)
            .unwrap_or(project.pages.len()),
    };

    project.pages.insert(insert_at, page);
    renumber_pages(&mut project.pages);
    save_pages(client, table_name, project_id, &project.pages).await?;

    ok_project(&project)
}

/// Director mode: reorder story pages
pub async fn reorder_pages(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: ReorderPagesRequest = serde_json::from_slice(body)?;

    let Some(mut project) =
        load_owned_project(client, table_name, project_id, user_id).await?
    else {
        return project_not_found();
    };

    match apply_reorder(std::mem::take(&mut project.pages), &req.page_ids) {
        Ok(pages) => project.pages = pages,
        Err(message) => return bad_request(message),
    }

    save_pages(client, table_name, project_id, &project.pages).await?;

    ok_project(&project)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str, kind: PageKind) -> Page {
        Page {
            page_id: id.to_string(),
            kind,
            page_no: 0,
            text: String::new(),
            visual_prompt: None,
            image_url: None,
            preview_url: None,
            generating: false,
        }
    }

    #[test]
    fn reorder_keeps_cover_and_back_in_place() {
        let pages = vec![
            page("c", PageKind::Cover),
            page("s1", PageKind::Story),
            page("s2", PageKind::Story),
            page("s3", PageKind::Story),
            page("b", PageKind::Back),
        ];

        let order = vec!["s3".to_string(), "s1".to_string(), "s2".to_string()];
        let reordered = apply_reorder(pages, &order).unwrap();

        let ids: Vec<&str> = reordered.iter().map(|p| p.page_id.as_str()).collect();
        assert_eq!(ids, ["c", "s3", "s1", "s2", "b"]);
        let numbers: Vec<u32> = reordered.iter().map(|p| p.page_no).collect();
        assert_eq!(numbers, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn reorder_rejects_unknown_and_duplicate_ids() {
        let pages = vec![
            page("c", PageKind::Cover),
            page("s1", PageKind::Story),
            page("s2", PageKind::Story),
            page("b", PageKind::Back),
        ];
        let unknown = vec!["s1".to_string(), "nope".to_string()];
        assert!(apply_reorder(pages.clone(), &unknown).is_err());

        let duplicate = vec!["s1".to_string(), "s1".to_string()];
        assert!(apply_reorder(pages.clone(), &duplicate).is_err());

        let incomplete = vec!["s1".to_string()];
        assert!(apply_reorder(pages, &incomplete).is_err());
    }

    #[test]
    fn renumbering_is_sequential_from_one() {
        let mut pages = vec![
            page("c", PageKind::Cover),
            page("s1", PageKind::Story),
            page("b", PageKind::Back),
        ];
        renumber_pages(&mut pages);
        assert_eq!(
            pages.iter().map(|p| p.page_no).collect::<Vec<_>>(),
            [1, 2, 3]
        );
    }
}
