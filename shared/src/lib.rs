pub mod types;
pub mod users;
pub mod projects;
pub mod redemptions;
pub mod orders;
pub mod s3;
pub mod previews;
pub mod gemini;
pub mod outline;
pub mod character;
pub mod script;
pub mod scene;

use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use gemini::GeminiClient;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub s3_client: S3Client,
    pub gemini: GeminiClient,
}

impl AppState {
    pub fn new(
        dynamo_client: DynamoClient,
        s3_client: S3Client,
        gemini: GeminiClient,
    ) -> Arc<Self> {
        Arc::new(Self {
            dynamo_client,
            s3_client,
            gemini,
        })
    }
}
