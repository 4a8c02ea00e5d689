use archflow_contracts::media::{MediaResult, ResolutionTier, UpscaleJob};

/// What to hand back when the upscale pass fails after a successful base
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpscaleFailurePolicy {
    /// Fail the whole generation with an upscale error.
    #[default]
    Strict,
    /// Return the base-resolution image and log the upscale failure.
    KeepBase,
}

impl UpscaleFailurePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" | "fail" => Some(Self::Strict),
            "keep-base" | "keep_base" | "keepbase" | "base" => Some(Self::KeepBase),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::KeepBase => "keep-base",
        }
    }
}

/// Upscale job for the first generated image that carries a media id,
/// paired with that image's index in `image_urls`. `None` when the tier
/// does not need one or no entry has an id to key it on.
pub fn upscale_target(tier: ResolutionTier, result: &MediaResult) -> Option<(usize, UpscaleJob)> {
    if !tier.requires_upscale() {
        return None;
    }
    let (index, media_id) = result
        .media_ids
        .iter()
        .take(result.image_urls.len())
        .enumerate()
        .find_map(|(index, media_id)| {
            let media_id = media_id.as_deref()?.trim();
            (!media_id.is_empty()).then(|| (index, media_id.to_string()))
        })?;
    Some((
        index,
        UpscaleJob {
            media_id,
            project_id: result.project_id.clone(),
            target: tier,
        },
    ))
}
