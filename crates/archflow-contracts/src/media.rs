use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    Square,
    Landscape,
    Portrait,
}

impl AspectRatio {
    pub fn image_tag(self) -> &'static str {
        match self {
            Self::Square => "IMAGE_ASPECT_RATIO_SQUARE",
            Self::Landscape => "IMAGE_ASPECT_RATIO_LANDSCAPE",
            Self::Portrait => "IMAGE_ASPECT_RATIO_PORTRAIT",
        }
    }

    pub fn video_tag(self) -> &'static str {
        match self {
            Self::Square => "VIDEO_ASPECT_RATIO_SQUARE",
            Self::Landscape => "VIDEO_ASPECT_RATIO_LANDSCAPE",
            Self::Portrait => "VIDEO_ASPECT_RATIO_PORTRAIT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "square" | "1:1" | "image_aspect_ratio_square" | "video_aspect_ratio_square" => {
                Some(Self::Square)
            }
            "landscape"
            | "wide"
            | "16:9"
            | "image_aspect_ratio_landscape"
            | "video_aspect_ratio_landscape" => Some(Self::Landscape),
            "portrait"
            | "tall"
            | "9:16"
            | "image_aspect_ratio_portrait"
            | "video_aspect_ratio_portrait" => Some(Self::Portrait),
            _ => None,
        }
    }
}

/// Output resolution the user paid for. Only 2K and 4K run the upscale step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionTier {
    Standard,
    OneK,
    TwoK,
    FourK,
}

impl ResolutionTier {
    pub fn requires_upscale(self) -> bool {
        matches!(self, Self::TwoK | Self::FourK)
    }

    pub fn upscale_tag(self) -> Option<&'static str> {
        match self {
            Self::TwoK => Some("UPSAMPLE_IMAGE_RESOLUTION_2K"),
            Self::FourK => Some("UPSAMPLE_IMAGE_RESOLUTION_4K"),
            Self::Standard | Self::OneK => None,
        }
    }

    pub fn credit_multiplier(self) -> u64 {
        match self {
            Self::Standard | Self::OneK => 1,
            Self::TwoK => 2,
            Self::FourK => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "standard" | "std" | "base" => Some(Self::Standard),
            "1k" => Some(Self::OneK),
            "2k" | "upsample_image_resolution_2k" => Some(Self::TwoK),
            "4k" | "upsample_image_resolution_4k" => Some(Self::FourK),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One create+poll cycle. Status only moves by re-reading the remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaJob {
    pub task_id: String,
    pub project_id: Option<String>,
    pub status: JobStatus,
}

impl MediaJob {
    pub fn submitted(task_id: impl Into<String>, project_id: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            project_id,
            status: JobStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleJob {
    pub media_id: String,
    pub project_id: Option<String>,
    pub target: ResolutionTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaResult {
    pub image_urls: Vec<String>,
    /// Parallel to `image_urls`; `None` where the entry had no media id.
    pub media_ids: Vec<Option<String>>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoResult {
    pub video_urls: Vec<String>,
    pub media_ids: Vec<Option<String>>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateImageRequest {
    pub action: String,
    pub prompt: String,
    pub images: Vec<String>,
    pub image: Option<String>,
    pub image_aspect_ratio: String,
    pub number_of_images: u32,
    pub image_model_name: String,
}

impl CreateImageRequest {
    pub fn new(
        prompt: &str,
        images: Vec<String>,
        ratio: AspectRatio,
        number_of_images: u32,
        model_wire_name: &str,
    ) -> Self {
        Self {
            action: "generateImage".to_string(),
            prompt: prompt.to_string(),
            image: images.first().cloned(),
            images,
            image_aspect_ratio: ratio.image_tag().to_string(),
            number_of_images,
            image_model_name: model_wire_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideoRequest {
    pub action: String,
    pub prompt: String,
    pub image: Option<String>,
    pub video_aspect_ratio: String,
    pub video_model_name: String,
}

impl CreateVideoRequest {
    pub fn new(
        prompt: &str,
        start_image: Option<String>,
        ratio: AspectRatio,
        model_wire_name: &str,
    ) -> Self {
        Self {
            action: "generateVideo".to_string(),
            prompt: prompt.to_string(),
            image: start_image,
            video_aspect_ratio: ratio.video_tag().to_string(),
            video_model_name: model_wire_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusRequest {
    pub action: String,
    pub task_id: String,
}

impl CheckStatusRequest {
    pub fn new(task_id: &str) -> Self {
        Self {
            action: "checkStatus".to_string(),
            task_id: task_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleRequest {
    pub action: String,
    pub media_id: String,
    pub project_id: Option<String>,
    pub target_resolution: String,
}

impl UpscaleRequest {
    pub fn for_job(job: &UpscaleJob) -> Option<Self> {
        Some(Self {
            action: "upscaleImage".to_string(),
            media_id: job.media_id.clone(),
            project_id: job.project_id.clone(),
            target_resolution: job.target.upscale_tag()?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn create_request_serializes_wire_shape() -> anyhow::Result<()> {
        let request = CreateImageRequest::new(
            "modern villa at dusk",
            vec!["data:image/jpeg;base64,AAAA".to_string()],
            AspectRatio::Landscape,
            1,
            "GEM_PIX_2",
        );
        let value = serde_json::to_value(&request)?;
        assert_eq!(
            value,
            json!({
                "action": "generateImage",
                "prompt": "modern villa at dusk",
                "images": ["data:image/jpeg;base64,AAAA"],
                "image": "data:image/jpeg;base64,AAAA",
                "imageAspectRatio": "IMAGE_ASPECT_RATIO_LANDSCAPE",
                "numberOfImages": 1,
                "imageModelName": "GEM_PIX_2",
            })
        );
        Ok(())
    }

    #[test]
    fn create_request_without_images_sends_null_image() -> anyhow::Result<()> {
        let request =
            CreateImageRequest::new("plan", Vec::new(), AspectRatio::Square, 1, "GEM_PIX");
        let value = serde_json::to_value(&request)?;
        assert!(value["image"].is_null());
        assert_eq!(value["images"], json!([]));
        Ok(())
    }

    #[test]
    fn upscale_request_only_exists_for_high_tiers() {
        let base = UpscaleJob {
            media_id: "m-1".to_string(),
            project_id: Some("p-1".to_string()),
            target: ResolutionTier::OneK,
        };
        assert!(UpscaleRequest::for_job(&base).is_none());

        let four_k = UpscaleJob {
            target: ResolutionTier::FourK,
            ..base
        };
        let request = UpscaleRequest::for_job(&four_k).expect("4K upscale request");
        assert_eq!(request.target_resolution, "UPSAMPLE_IMAGE_RESOLUTION_4K");
        assert_eq!(request.project_id.as_deref(), Some("p-1"));
    }

    #[test]
    fn aspect_ratio_parses_user_aliases() {
        assert_eq!(AspectRatio::parse("16:9"), Some(AspectRatio::Landscape));
        assert_eq!(AspectRatio::parse(" Tall "), Some(AspectRatio::Portrait));
        assert_eq!(
            AspectRatio::parse("IMAGE_ASPECT_RATIO_SQUARE"),
            Some(AspectRatio::Square)
        );
        assert_eq!(AspectRatio::parse("3:2"), None);
    }

    #[test]
    fn only_two_and_four_k_require_upscale() {
        assert!(!ResolutionTier::Standard.requires_upscale());
        assert!(!ResolutionTier::OneK.requires_upscale());
        assert!(ResolutionTier::TwoK.requires_upscale());
        assert!(ResolutionTier::FourK.requires_upscale());
        assert_eq!(ResolutionTier::parse("2k"), Some(ResolutionTier::TwoK));
    }
}
