//! Publication metadata.

/// Bibliographic metadata carried into the content document, sync files,
/// navigation index and package.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "cli", serde(default))]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    /// Unique publication identifier (`dtb:uid`).
    pub identifier: String,
    pub publisher: Option<String>,
    pub date: Option<String>,
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    /// Language for `xml:lang`, falling back to English.
    pub fn language_or_default(&self) -> &str {
        if self.language.is_empty() {
            "en"
        } else {
            &self.language
        }
    }
}
