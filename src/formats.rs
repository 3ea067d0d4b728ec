//! Client for the file-type registry: which extensions are accepted, and
//! which type group each one belongs to.

use std::collections::BTreeMap;

use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::FileDescriptor;

#[derive(Debug, Error)]
pub enum FormatsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Registry responded {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Deserialize)]
struct SimpleList {
    list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GroupedList {
    #[serde(rename = "type")]
    groups: BTreeMap<String, Vec<String>>,
}

/// A processing step the user can request for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOption {
    pub value: String,
    pub label: String,
    /// Type groups this option is offered for
    #[serde(default)]
    pub applies_to: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    extensions: Vec<String>,
    groups: BTreeMap<String, Vec<String>>,
}

fn normalize(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

impl FormatRegistry {
    pub fn new(extensions: Vec<String>, groups: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            extensions: extensions.iter().map(|e| normalize(e)).collect(),
            groups: groups
                .into_iter()
                .map(|(group, exts)| (group, exts.iter().map(|e| normalize(e)).collect()))
                .collect(),
        }
    }

    /// Load both lists from the registry at `base_url`.
    pub async fn fetch(client: &reqwest::Client, base_url: &str) -> Result<Self, FormatsError> {
        let base = base_url.trim_end_matches('/');

        let simple: SimpleList = get_json(client, &format!("{base}/type-list-simple")).await?;
        let grouped: GroupedList = get_json(client, &format!("{base}/type-list-grouped")).await?;

        tracing::info!(
            extensions = simple.list.len(),
            groups = grouped.groups.len(),
            "Loaded file-type registry"
        );
        Ok(Self::new(simple.list, grouped.groups))
    }

    /// Allowlist for validation, lowercase and without dots.
    pub fn accepted_extensions(&self) -> &[String] {
        &self.extensions
    }

    /// First type group listing `extension`.
    pub fn group_for(&self, extension: &str) -> Option<&str> {
        let extension = normalize(extension);
        self.groups
            .iter()
            .find(|(_, exts)| exts.contains(&extension))
            .map(|(group, _)| group.as_str())
    }

    /// Options from `catalogue` that apply to `file`'s type group.
    pub fn processing_options_for<'a>(
        &self,
        file: &FileDescriptor,
        catalogue: &'a [ProcessingOption],
    ) -> Vec<&'a ProcessingOption> {
        let Some(group) = file.extension().and_then(|ext| self.group_for(&ext)) else {
            return Vec::new();
        };
        catalogue
            .iter()
            .filter(|option| option.applies_to.iter().any(|g| g == group))
            .collect()
    }

    /// Drop requested options that are not offered for `file`.
    pub fn allowed_processing(
        &self,
        file: &FileDescriptor,
        requested: Vec<String>,
        catalogue: &[ProcessingOption],
    ) -> Vec<String> {
        let offered = self.processing_options_for(file, catalogue);
        requested
            .into_iter()
            .filter(|value| offered.iter().any(|o| &o.value == value))
            .collect()
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, FormatsError> {
    let resp = client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(FormatsError::Status(resp.status()));
    }
    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::DroppedFile;
    use axum::routing::get;
    use axum::{Json, Router};

    fn catalogue() -> Vec<ProcessingOption> {
        vec![
            ProcessingOption {
                value: "transcribe".into(),
                label: "Transcribe audio".into(),
                applies_to: vec!["audio".into(), "video".into()],
            },
            ProcessingOption {
                value: "ocr".into(),
                label: "Text recognition".into(),
                applies_to: vec!["image".into()],
            },
        ]
    }

    fn registry() -> FormatRegistry {
        let mut groups = BTreeMap::new();
        groups.insert("audio".to_string(), vec!["mp3".to_string(), "WAV".to_string()]);
        groups.insert("image".to_string(), vec![".png".to_string()]);
        FormatRegistry::new(vec!["mp3".into(), ".wav".into(), "PNG".into()], groups)
    }

    #[test]
    fn test_extensions_are_normalized() {
        assert_eq!(registry().accepted_extensions(), ["mp3", "wav", "png"]);
        assert_eq!(registry().group_for(".Wav"), Some("audio"));
        assert_eq!(registry().group_for("csv"), None);
    }

    fn named(name: &str) -> FileDescriptor {
        FileDescriptor::new(
            DroppedFile::from_url(&format!("https://example.org/{name}"), 1),
            name.to_string(),
        )
    }

    #[test]
    fn test_processing_options_follow_group() {
        let catalogue = catalogue();
        let registry = registry();

        let options = registry.processing_options_for(&named("interview.MP3"), &catalogue);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].value, "transcribe");

        assert!(registry.processing_options_for(&named("notes"), &catalogue).is_empty());
        assert!(registry.processing_options_for(&named("data.csv"), &catalogue).is_empty());

        let allowed = registry.allowed_processing(
            &named("scan.png"),
            vec!["ocr".into(), "transcribe".into()],
            &catalogue,
        );
        assert_eq!(allowed, vec!["ocr".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_reads_both_lists() {
        let app = Router::new()
            .route(
                "/type-list-simple",
                get(|| async { Json(serde_json::json!({ "list": ["csv", "mp3"] })) }),
            )
            .route(
                "/type-list-grouped",
                get(|| async {
                    Json(serde_json::json!({ "type": { "tabular": ["csv"], "audio": ["mp3"] } }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let registry = FormatRegistry::fetch(&reqwest::Client::new(), &format!("http://{addr}/"))
            .await
            .unwrap();

        assert_eq!(registry.accepted_extensions(), ["csv", "mp3"]);
        assert_eq!(registry.group_for("csv"), Some("tabular"));
    }

    #[tokio::test]
    async fn test_fetch_surfaces_error_status() {
        let app = Router::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let err = FormatRegistry::fetch(&reqwest::Client::new(), &format!("http://{addr}"))
            .await
            .unwrap_err();
        assert!(matches!(err, FormatsError::Status(s) if s == reqwest::StatusCode::NOT_FOUND));
    }
}
