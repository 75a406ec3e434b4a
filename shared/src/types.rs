use serde::{Deserialize, Serialize};

// ========== USER ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub coins: i64,
    pub first_recharge_used: bool,
    pub created_at: String,
    pub last_login: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
}

// ========== WORKFLOW ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStep {
    Idea,
    Outline,
    Character,
    Director,
    Preview,
    Ordered,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Idea => "idea",
            WorkflowStep::Outline => "outline",
            WorkflowStep::Character => "character",
            WorkflowStep::Director => "director",
            WorkflowStep::Preview => "preview",
            WorkflowStep::Ordered => "ordered",
        }
    }

    pub fn parse(s: &str) -> Option<WorkflowStep> {
        match s {
            "idea" => Some(WorkflowStep::Idea),
            "outline" => Some(WorkflowStep::Outline),
            "character" => Some(WorkflowStep::Character),
            "director" => Some(WorkflowStep::Director),
            "preview" => Some(WorkflowStep::Preview),
            "ordered" => Some(WorkflowStep::Ordered),
            _ => None,
        }
    }
}

// ========== PAGE ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Cover,
    Story,
    Back,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Page {
    pub page_id: String,
    pub kind: PageKind,
    pub page_no: u32,
    pub text: String,
    pub visual_prompt: Option<String>,
    pub image_url: Option<String>,
    pub preview_url: Option<String>,
    /// Set by the UI while a request is in flight; always false at rest.
    #[serde(default)]
    pub generating: bool,
}

// ========== PROJECT ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Project {
    pub project_id: String,
    pub owner_id: String,
    pub title: String,
    pub idea: String,
    pub template: Option<String>,
    pub pages: Vec<Page>,
    pub character_description: Option<String>,
    pub character_image_url: Option<String>,
    pub style: Option<String>,
    pub style_reference_url: Option<String>,
    pub style_description: Option<String>,
    pub extraction_code: Option<String>,
    pub current_step: WorkflowStep,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    pub idea: String,
    pub template: Option<String>,
    pub style: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub idea: Option<String>,
    pub template: Option<String>,
    pub style: Option<String>,
    pub style_reference_url: Option<String>,
    pub style_description: Option<String>,
    pub character_description: Option<String>,
    pub character_image_url: Option<String>,
    pub pages: Option<Vec<Page>>,
    pub current_step: Option<WorkflowStep>,
}

#[derive(Debug, Deserialize)]
pub struct AddPageRequest {
    pub text: String,
    pub visual_prompt: Option<String>,
    /// Insert after this story page; appended before the back cover when absent.
    pub after_page_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderPagesRequest {
    /// Full ordering of the story pages. Cover and back keep their slots.
    pub page_ids: Vec<String>,
}

// ========== GENERATION ==========
/// Inline base64 payload accompanying a generation request (reference
/// photos, style samples).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InlinePayload {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateOutlineRequest {
    pub reference_image: Option<InlinePayload>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateCharactersRequest {
    pub description: String,
    #[serde(default)]
    pub reference_images: Vec<InlinePayload>,
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmCharacterRequest {
    pub image_url: String,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeScriptRequest {
    pub style_reference: Option<InlinePayload>,
}

#[derive(Debug, Deserialize)]
pub struct RenderPageRequest {
    /// Replacing an existing illustration requires an explicit redraw.
    #[serde(default)]
    pub redraw: bool,
}

#[derive(Debug, Deserialize)]
pub struct EditPageRequest {
    pub instruction: String,
}

// ========== REDEMPTION ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RedemptionCode {
    pub code: String,
    pub value: i64,
    pub status: String, // pending | used
    pub used_by: Option<String>,
    pub used_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub coins: i64,
    pub value: i64,
    pub first_recharge: bool,
}

// ========== ORDER ==========
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub extraction_code: String,
    pub snapshot_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_step_round_trips_through_strings() {
        for step in [
            WorkflowStep::Idea,
            WorkflowStep::Outline,
            WorkflowStep::Character,
            WorkflowStep::Director,
            WorkflowStep::Preview,
            WorkflowStep::Ordered,
        ] {
            assert_eq!(WorkflowStep::parse(step.as_str()), Some(step));
        }
        assert_eq!(WorkflowStep::parse("published"), None);
    }

    #[test]
    fn page_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PageKind::Cover).unwrap(), "\"cover\"");
        assert_eq!(serde_json::to_string(&PageKind::Back).unwrap(), "\"back\"");
    }
}
