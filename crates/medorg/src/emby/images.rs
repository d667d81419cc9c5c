//! Best-effort image management for server items.
//!
//! Three slots are maintained per item: Primary (original bytes), Backdrop
//! and Banner (both from a w=800 variant of the same source URL). Nothing
//! here gates pipeline completion; every failure is a warning.

use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use super::EmbyClient;
use crate::error::EmbyError;

const IMAGE_TIMEOUT: Duration = Duration::from_secs(60);

// Backdrop supports multiple indices; clear the first few before uploading.
const BACKDROP_CLEAR_INDICES: u32 = 5;

/// Rewrite an image URL to request the wide variant: force `w=800` and drop
/// the `horizontal` parameter.
pub(crate) fn wide_variant_url(image_url: &str) -> String {
    let Ok(parsed) = Url::parse(image_url) else {
        return image_url.to_string();
    };

    let mut rewritten = parsed.clone();
    {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| key != "w" && key != "horizontal")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let mut pairs = rewritten.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("w", "800");
    }
    rewritten.to_string()
}

impl EmbyClient {
    /// Download, then refresh all three image slots for an item.
    ///
    /// Returns whether at least one slot was uploaded. Per-image failures
    /// are logged and never abort the flow.
    pub async fn upload_item_images(&self, item_id: &str, image_url: &str) -> bool {
        if image_url.is_empty() {
            warn!(item_id, "no image URL, skipping image upload");
            return false;
        }

        let mut any_success = false;

        // Primary: the original bytes.
        match self.download_image(image_url).await {
            Ok((bytes, content_type)) => {
                if self
                    .replace_image(item_id, "Primary", &bytes, &content_type)
                    .await
                {
                    any_success = true;
                }
            }
            Err(e) => warn!(item_id, image_url, error = %e, "primary image download failed"),
        }

        // Backdrop and Banner: the wide variant.
        let wide_url = wide_variant_url(image_url);
        match self.download_image(&wide_url).await {
            Ok((bytes, content_type)) => {
                if self
                    .replace_image(item_id, "Backdrop", &bytes, &content_type)
                    .await
                {
                    any_success = true;
                }
                if self
                    .replace_image(item_id, "Banner", &bytes, &content_type)
                    .await
                {
                    any_success = true;
                }
            }
            Err(e) => warn!(item_id, wide_url, error = %e, "wide image download failed"),
        }

        if any_success {
            info!(item_id, "image upload finished");
        } else {
            warn!(item_id, "all image uploads failed");
        }
        any_success
    }

    /// Delete the existing slot, then upload. Best-effort end to end.
    async fn replace_image(
        &self,
        item_id: &str,
        image_type: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> bool {
        let clear_indices = if image_type == "Backdrop" {
            BACKDROP_CLEAR_INDICES
        } else {
            1
        };
        for index in 0..clear_indices {
            if let Err(e) = self.delete_image(item_id, image_type, index).await {
                warn!(item_id, image_type, index, error = %e, "image delete failed");
            }
        }

        match self.upload_image(item_id, image_type, bytes, content_type).await {
            Ok(()) => {
                info!(item_id, image_type, len = bytes.len(), "image uploaded");
                true
            }
            Err(e) => {
                warn!(item_id, image_type, error = %e, "image upload failed");
                false
            }
        }
    }

    /// Fetch image bytes, validating the payload rather than the status:
    /// the upstream media proxy is known to emit valid image bytes with a
    /// 404 status, so any response with a non-empty `image/*` body counts.
    async fn download_image(&self, image_url: &str) -> Result<(Vec<u8>, String), EmbyError> {
        let response = self
            .http
            .get(image_url)
            .header(reqwest::header::ACCEPT, "image/*,*/*;q=0.8")
            .timeout(IMAGE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.bytes().await?;

        if content_type.starts_with("image/") && !body.is_empty() {
            info!(
                image_url,
                len = body.len(),
                %status,
                "downloaded image"
            );
            return Ok((body.to_vec(), content_type));
        }

        Err(EmbyError::NotAnImage {
            url: image_url.to_string(),
            content_type,
            len: body.len(),
        })
    }

    /// DELETE an image slot; 404 means it was already gone, which is fine.
    pub async fn delete_image(
        &self,
        item_id: &str,
        image_type: &str,
        index: u32,
    ) -> Result<(), EmbyError> {
        let endpoint = format!(
            "{}/Items/{}/Images/{}/{}",
            self.base_url, item_id, image_type, index
        );
        let response = self
            .http
            .delete(&endpoint)
            .header(super::TOKEN_HEADER, &self.api_key)
            .timeout(super::LOOKUP_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(EmbyError::Status {
            status,
            endpoint,
        })
    }

    /// POST raw image bytes. This endpoint authenticates through the
    /// `api_key` query parameter instead of the token header.
    async fn upload_image(
        &self,
        item_id: &str,
        image_type: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), EmbyError> {
        let endpoint = format!("{}/Items/{}/Images/{}", self.base_url, item_id, image_type);
        let content_type = if content_type.is_empty() {
            "image/jpeg"
        } else {
            content_type
        };

        let response = self
            .http
            .post(&endpoint)
            .query(&[("api_key", &self.api_key)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .timeout(IMAGE_TIMEOUT)
            .body(bytes.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbyError::Status {
                status: response.status(),
                endpoint,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_variant_sets_width() {
        let url = wide_variant_url("https://img.example/cover.jpg?w=400&h=600");
        assert!(url.contains("w=800"));
        assert!(url.contains("h=600"));
        assert!(!url.contains("w=400"));
    }

    #[test]
    fn test_wide_variant_removes_horizontal() {
        let url = wide_variant_url("https://img.example/c.jpg?horizontal=1&q=80");
        assert!(!url.contains("horizontal"));
        assert!(url.contains("q=80"));
        assert!(url.contains("w=800"));
    }

    #[test]
    fn test_wide_variant_without_query() {
        let url = wide_variant_url("https://img.example/c.jpg");
        assert_eq!(url, "https://img.example/c.jpg?w=800");
    }

    #[test]
    fn test_wide_variant_invalid_url_passthrough() {
        assert_eq!(wide_variant_url("not a url"), "not a url");
    }
}
