use crate::core::interfaces::CssProcessor;
use crate::utils::{Logger, Result, Timer};
use lightningcss::{
    printer::PrinterOptions,
    stylesheet::{ParserOptions as CssParserOptions, StyleSheet},
};

/// Stylesheet stage backed by Lightning CSS
pub struct LightningCssProcessor {
    minify: bool,
}

impl LightningCssProcessor {
    pub fn new(minify: bool) -> Self {
        Self { minify }
    }

    fn fallback_minify(&self, content: &str) -> String {
        if self.minify {
            content
                .lines()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("")
        } else {
            content.to_string()
        }
    }
}

#[async_trait::async_trait]
impl CssProcessor for LightningCssProcessor {
    async fn process_stylesheet(&self, chunk_name: &str, source: &str) -> Result<String> {
        let _timer = Timer::start(&format!("Processing CSS for chunk {}", chunk_name));

        let stylesheet = match StyleSheet::parse(source, CssParserOptions::default()) {
            Ok(stylesheet) => stylesheet,
            Err(e) => {
                Logger::warn(&format!(
                    "CSS parse error in chunk {} ({}), using fallback minification",
                    chunk_name, e
                ));
                return Ok(self.fallback_minify(source));
            }
        };

        match stylesheet.to_css(PrinterOptions {
            minify: self.minify,
            ..Default::default()
        }) {
            Ok(result) => Ok(result.code),
            Err(e) => {
                Logger::warn(&format!(
                    "CSS printing failed for chunk {} ({}), using fallback minification",
                    chunk_name, e
                ));
                Ok(self.fallback_minify(source))
            }
        }
    }

    fn cache_identity(&self) -> String {
        format!("lightningcss:minify={}", self.minify)
    }
}

impl Default for LightningCssProcessor {
    fn default() -> Self {
        Self::new(true)
    }
}
