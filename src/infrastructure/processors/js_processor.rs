use crate::core::interfaces::JsProcessor;
use crate::utils::Result;

/// Hands rendered chunk source through untouched. Transpilation and
/// minification plug in behind the same trait.
#[derive(Debug, Clone, Default)]
pub struct PassthroughJsProcessor;

impl PassthroughJsProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl JsProcessor for PassthroughJsProcessor {
    async fn process_chunk(&self, _chunk_name: &str, source: &str) -> Result<String> {
        Ok(source.to_string())
    }

    fn cache_identity(&self) -> String {
        "passthrough".to_string()
    }
}
