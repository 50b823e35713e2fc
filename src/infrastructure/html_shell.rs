use crate::core::interfaces::HtmlShell;
use crate::core::models::{AssetClass, EmittedAsset};
use crate::utils::{BedrockError, Result};
use std::path::PathBuf;

const DEFAULT_DOCUMENT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
</head>
<body>
<div id="root"></div>
</body>
</html>
"#;

/// Injects stylesheet links and deferred, anonymous-CORS script tags into an
/// HTML template. Scripts keep emission order (runtime first).
pub struct TemplateHtmlShell {
    template: Option<PathBuf>,
    public_path: String,
}

impl TemplateHtmlShell {
    pub fn new(template: Option<PathBuf>, public_path: &str) -> Self {
        Self {
            template,
            public_path: public_path.to_string(),
        }
    }

    async fn load_template(&self) -> Result<String> {
        match &self.template {
            Some(path) if path.is_file() => tokio::fs::read_to_string(path)
                .await
                .map_err(BedrockError::Io),
            _ => Ok(DEFAULT_DOCUMENT.to_string()),
        }
    }

    fn tags(&self, assets: &[EmittedAsset]) -> String {
        let mut tags = String::new();

        for asset in assets.iter().filter(|a| a.class == AssetClass::Style) {
            tags.push_str(&format!(
                "<link rel=\"stylesheet\" href=\"{}{}\">\n",
                self.public_path, asset.file_name
            ));
        }

        for asset in assets.iter().filter(|a| a.class == AssetClass::Script) {
            tags.push_str(&format!(
                "<script defer crossorigin=\"anonymous\" src=\"{}{}\"></script>\n",
                self.public_path, asset.file_name
            ));
        }

        tags
    }

    pub fn inject(document: &str, tags: &str) -> String {
        match document.find("</head>") {
            Some(pos) => {
                let mut out = String::with_capacity(document.len() + tags.len());
                out.push_str(&document[..pos]);
                out.push_str(tags);
                out.push_str(&document[pos..]);
                out
            }
            None => format!("{}{}", tags, document),
        }
    }
}

#[async_trait::async_trait]
impl HtmlShell for TemplateHtmlShell {
    async fn render(&self, assets: &[EmittedAsset]) -> Result<String> {
        let document = self.load_template().await?;
        Ok(Self::inject(&document, &self.tags(assets)))
    }
}
