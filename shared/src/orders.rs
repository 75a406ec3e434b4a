use crate::types::{OrderResponse, WorkflowStep};
use crate::{projects, s3};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{http::StatusCode, Body, Error, Response};

/// User-facing alphanumeric code identifying an archived book for offline
/// fulfillment.
pub fn new_extraction_code() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..8].to_uppercase()
}

fn not_found(message: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::json!({ "error": message }).to_string().into())
        .map_err(Box::new)?)
}

/// Order the finished book: archive a JSON snapshot to S3, issue an
/// extraction code, and mark the project ordered. Ordering twice returns the
/// code issued the first time.
pub async fn create_order(
    client: &DynamoClient,
    s3_client: &S3Client,
    table_name: &str,
    user_id: &str,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    let Some(mut project) =
        projects::load_owned_project(client, table_name, project_id, user_id).await?
    else {
        return not_found("Project not found");
    };

    let bucket = s3::bucket_name();
    let snapshot_key = s3::object_key(user_id, project_id, "book.json");

    if let Some(code) = project.extraction_code.clone() {
        let snapshot_url = s3::presigned_download_url(s3_client, &bucket, &snapshot_key).await?;
        let response = OrderResponse {
            extraction_code: code,
            snapshot_url,
        };
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(serde_json::to_string(&response)?.into())
            .map_err(Box::new)?);
    }

    project.current_step = WorkflowStep::Ordered;
    s3::put_object(
        s3_client,
        &bucket,
        &snapshot_key,
        serde_json::to_vec(&project)?,
        "application/json",
    )
    .await?;

    // The conditional put covers the (unlikely) collision of two projects
    // drawing the same 8-character code.
    let now = chrono::Utc::now().to_rfc3339();
    let mut issued_code = None;
    for _ in 0..3 {
        let code = new_extraction_code();
        let result = client
            .put_item()
            .table_name(table_name)
            .item("PK", AttributeValue::S(format!("EXTRACT#{}", code)))
            .item("SK", AttributeValue::S("METADATA".to_string()))
            .item("extraction_code", AttributeValue::S(code.clone()))
            .item("project_id", AttributeValue::S(project_id.to_string()))
            .item("user_id", AttributeValue::S(user_id.to_string()))
            .item("created_at", AttributeValue::S(now.clone()))
            .condition_expression("attribute_not_exists(PK)")
            .send()
            .await;

        match result {
            Ok(_) => {
                issued_code = Some(code);
                break;
            }
            Err(e) => {
                let message = format!("{:?}", e);
                if crate::users::is_conditional_check_failed(&message) {
                    tracing::warn!("Extraction code collision, drawing a new code");
                    continue;
                }
                return Err(message.into());
            }
        }
    }

    let Some(code) = issued_code else {
        return Err("Failed to issue an extraction code".into());
    };

    let pk = format!("PROJECT#{}", project_id);
    client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .update_expression("SET extraction_code = :code, current_step = :step")
        .expression_attribute_values(":code", AttributeValue::S(code.clone()))
        .expression_attribute_values(
            ":step",
            AttributeValue::S(WorkflowStep::Ordered.as_str().to_string()),
        )
        .send()
        .await?;

    tracing::info!("Project {} ordered with code {}", project_id, code);

    let snapshot_url = s3::presigned_download_url(s3_client, &bucket, &snapshot_key).await?;
    let response = OrderResponse {
        extraction_code: code,
        snapshot_url,
    };

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(&response)?.into())
        .map_err(Box::new)?)
}

/// Resolve an extraction code to the archived book snapshot.
pub async fn get_order(
    client: &DynamoClient,
    s3_client: &S3Client,
    table_name: &str,
    code: &str,
) -> Result<Response<Body>, Error> {
    let code = crate::redemptions::normalize_code(code);

    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(format!("EXTRACT#{}", code)))
        .key("SK", AttributeValue::S("METADATA".to_string()))
        .send()
        .await?;

    let Some(item) = result.item() else {
        return not_found("Extraction code not found");
    };

    let project_id = item
        .get("project_id")
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .unwrap_or_default();
    let user_id = item
        .get("user_id")
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .unwrap_or_default();
    let created_at = item
        .get("created_at")
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .unwrap_or_default();

    let bucket = s3::bucket_name();
    let snapshot_key = s3::object_key(&user_id, &project_id, "book.json");
    let snapshot_url = s3::presigned_download_url(s3_client, &bucket, &snapshot_key).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({
                "extraction_code": code,
                "project_id": project_id,
                "created_at": created_at,
                "snapshot_url": snapshot_url,
            })
            .to_string()
            .into(),
        )
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_codes_are_eight_uppercase_hex_chars() {
        let code = new_extraction_code();
        assert_eq!(code.len(), 8);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn extraction_codes_vary() {
        assert_ne!(new_extraction_code(), new_extraction_code());
    }
}
