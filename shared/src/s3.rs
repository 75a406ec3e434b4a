use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use base64::{engine::general_purpose, Engine as _};
use lambda_http::{http::StatusCode, Body, Error, Response};
use sha2::{Digest, Sha256};
use std::env;

/// Presigned download URLs stay valid for one hour.
pub const DOWNLOAD_URL_TTL_SECS: u64 = 3600;

pub fn bucket_name() -> String {
    env::var("BUCKET_NAME").unwrap_or_else(|_| "storynest-books".to_string())
}

/// Every object of a project lives under this prefix.
pub fn project_prefix(user_id: &str, project_id: &str) -> String {
    format!("users/{}/projects/{}/", user_id, project_id)
}

pub fn object_key(user_id: &str, project_id: &str, file_name: &str) -> String {
    format!("{}{}", project_prefix(user_id, project_id), file_name)
}

pub fn object_url(bucket: &str, key: &str) -> String {
    format!("https://{}.s3.amazonaws.com/{}", bucket, key)
}

/// Inverse of `object_url`, for records that store the canonical URL.
pub fn key_for_url(bucket: &str, url: &str) -> Option<String> {
    url.strip_prefix(&format!("https://{}.s3.amazonaws.com/", bucket))
        .map(|key| key.to_string())
}

pub async fn put_object(
    s3_client: &S3Client,
    bucket: &str,
    key: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<String, Error> {
    s3_client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(bytes))
        .content_type(content_type)
        .send()
        .await
        .map_err(|e| format!("Failed to upload to S3: {}", e))?;

    Ok(object_url(bucket, key))
}

/// Fetch an object back as base64, to feed stored images into generation
/// requests (character seed, current page image).
pub async fn get_object_b64(
    s3_client: &S3Client,
    bucket: &str,
    key: &str,
) -> Result<String, Error> {
    let output = s3_client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| format!("Failed to fetch {} from S3: {}", key, e))?;

    let bytes = output
        .body
        .collect()
        .await
        .map_err(|e| format!("Failed to read S3 body for {}: {}", key, e))?
        .into_bytes();

    Ok(general_purpose::STANDARD.encode(bytes))
}

/// Generate a presigned GET URL for a stored object.
pub async fn presigned_download_url(
    s3_client: &S3Client,
    bucket: &str,
    key: &str,
) -> Result<String, Error> {
    let presigned = s3_client
        .get_object()
        .bucket(bucket)
        .key(key)
        .presigned(PresigningConfig::expires_in(
            std::time::Duration::from_secs(DOWNLOAD_URL_TTL_SECS),
        )?)
        .await
        .map_err(|e| format!("Failed to generate presigned URL: {}", e))?;

    Ok(presigned.uri().to_string())
}

/// Delete everything under a project's prefix.
pub async fn delete_project_prefix(
    s3_client: &S3Client,
    bucket: &str,
    user_id: &str,
    project_id: &str,
) -> Result<(), Error> {
    let prefix = project_prefix(user_id, project_id);

    let mut continuation: Option<String> = None;
    loop {
        let mut req = s3_client.list_objects_v2().bucket(bucket).prefix(&prefix);
        if let Some(token) = continuation.as_ref() {
            req = req.continuation_token(token);
        }
        let resp = req.send().await.map_err(|e| {
            tracing::error!("S3 list_objects_v2 failed for prefix {}: {}", prefix, e);
            format!("S3 list failed: {}", e)
        })?;

        let contents = resp.contents();
        let objects: Vec<_> = contents
            .iter()
            .filter_map(|o| o.key())
            .filter_map(|k| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .ok()
            })
            .collect();
        if objects.is_empty() {
            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|s| s.to_string());
                continue;
            } else {
                break;
            }
        }

        let delete_payload = aws_sdk_s3::types::Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|e| format!("Failed to build S3 delete payload: {:?}", e))?;

        let _ = s3_client
            .delete_objects()
            .bucket(bucket)
            .delete(delete_payload)
            .send()
            .await;

        if resp.is_truncated().unwrap_or(false) {
            continuation = resp.next_continuation_token().map(|s| s.to_string());
        } else {
            break;
        }
    }
    Ok(())
}

#[derive(serde::Deserialize)]
pub struct UploadImageRequest {
    pub file_name: String,
    pub content_type: String,
    pub file_data: String, // base64 encoded
}

#[derive(serde::Serialize)]
pub struct UploadImageResponse {
    pub url: String,
    pub download_url: String,
}

/// Content-addressed filename for an uploaded reference image, so the same
/// bytes re-uploaded land on the same key.
pub fn reference_file_name(file_name: &str, bytes: &[u8]) -> String {
    let extension = file_name.split('.').last().unwrap_or("jpg");
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("ref-{}.{}", hex, extension)
}

/// Upload a user-supplied reference image (character photo, style sample)
/// and return both the canonical URL and a presigned download URL.
pub async fn upload_reference_image(
    s3_client: &S3Client,
    user_id: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let request: UploadImageRequest = serde_json::from_slice(body)?;

    let file_bytes = general_purpose::STANDARD
        .decode(&request.file_data)
        .map_err(|e| format!("Failed to decode base64: {}", e))?;

    let bucket = bucket_name();
    let file_name = reference_file_name(&request.file_name, &file_bytes);
    let key = object_key(user_id, project_id, &file_name);

    let url = put_object(
        s3_client,
        &bucket,
        &key,
        file_bytes,
        &request.content_type,
    )
    .await?;
    let download_url = presigned_download_url(s3_client, &bucket, &key).await?;

    let response = UploadImageResponse { url, download_url };

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(&response)?.into())
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_follow_the_path_convention() {
        let key = object_key("u-1", "p-9", "page-3.png");
        assert_eq!(key, "users/u-1/projects/p-9/page-3.png");
        assert!(key.starts_with(&project_prefix("u-1", "p-9")));
    }

    #[test]
    fn url_and_key_round_trip() {
        let url = object_url("storynest-books", "users/u/projects/p/book.json");
        assert_eq!(
            key_for_url("storynest-books", &url).unwrap(),
            "users/u/projects/p/book.json"
        );
        assert!(key_for_url("other-bucket", &url).is_none());
    }

    #[test]
    fn reference_names_are_content_addressed() {
        let a = reference_file_name("photo.png", b"same bytes");
        let b = reference_file_name("different-name.png", b"same bytes");
        let c = reference_file_name("photo.png", b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("ref-") && a.ends_with(".png"));
        assert_eq!(a.len(), "ref-".len() + 16 + ".png".len());
    }
}
