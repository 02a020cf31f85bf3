//! Error Template Store

use std::io;

use super::atomic;
use super::error::StoreError;
use super::layout::StateDir;

/// Template used when none is stored
pub const DEFAULT_ERROR_TEMPLATE: &str = "❌ Something went wrong:\n<pre><code>%v</code></pre>";

/// Substitution point for the error text
pub const PLACEHOLDER: &str = "%v";

/// Storage of `error.tmpl`
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: StateDir,
}

impl TemplateStore {
    pub fn new(dir: StateDir) -> Self {
        Self { dir }
    }

    /// Stored template, or [`DEFAULT_ERROR_TEMPLATE`] when absent or empty
    pub async fn get(&self) -> Result<String, StoreError> {
        match tokio::fs::read_to_string(self.dir.error_template_path()).await {
            Ok(text) if text.is_empty() => Ok(DEFAULT_ERROR_TEMPLATE.to_string()),
            Ok(text) => Ok(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Ok(DEFAULT_ERROR_TEMPLATE.to_string())
            }
            Err(err) => Err(StoreError::io("read error template", err)),
        }
    }

    /// Store any UTF-8 text
    pub async fn put(&self, body: &[u8]) -> Result<(), StoreError> {
        std::str::from_utf8(body).map_err(|e| StoreError::InvalidText {
            resource: "error template",
            reason: format!("not UTF-8: {e}"),
        })?;

        atomic::replace(&self.dir.error_template_path(), body)
            .await
            .map_err(|e| StoreError::io("write error template", e))?;

        tracing::info!(bytes = body.len(), "Error template updated");
        Ok(())
    }
}

/// Fill the first `%v` of `template` with the HTML-escaped error text.
/// Without a placeholder the error goes on a line of its own at the end.
pub fn render(template: &str, error: &str) -> String {
    let escaped = html_escape::encode_text(error);
    match template.find(PLACEHOLDER) {
        Some(idx) => {
            let mut out = String::with_capacity(template.len() + escaped.len());
            out.push_str(&template[..idx]);
            out.push_str(&escaped);
            out.push_str(&template[idx + PLACEHOLDER.len()..]);
            out
        }
        None if template.is_empty() => escaped.into_owned(),
        None => format!("{template}\n{escaped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> TemplateStore {
        let dir = StateDir::new(tmp.path());
        dir.init().unwrap();
        TemplateStore::new(dir)
    }

    #[tokio::test]
    async fn test_default_when_absent() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(store(&tmp).get().await.unwrap(), DEFAULT_ERROR_TEMPLATE);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.put("Custom error: %v".as_bytes()).await.unwrap();
        assert_eq!(store.get().await.unwrap(), "Custom error: %v");
    }

    #[tokio::test]
    async fn test_empty_falls_back_but_whitespace_is_kept() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.put(b"").await.unwrap();
        assert_eq!(store.get().await.unwrap(), DEFAULT_ERROR_TEMPLATE);

        store.put(b" \n").await.unwrap();
        assert_eq!(store.get().await.unwrap(), " \n");
    }

    #[tokio::test]
    async fn test_non_utf8_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = store(&tmp).put(&[0xc3, 0x28]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidText { .. }));
    }

    #[test]
    fn test_render_escapes() {
        let out = render(DEFAULT_ERROR_TEMPLATE, "<b>bad</b> & worse");
        assert_eq!(
            out,
            "❌ Something went wrong:\n<pre><code>&lt;b&gt;bad&lt;/b&gt; &amp; worse</code></pre>"
        );
    }

    #[test]
    fn test_render_first_placeholder_only() {
        assert_eq!(render("%v / %v", "x"), "x / %v");
    }

    #[test]
    fn test_render_without_placeholder() {
        assert_eq!(render("Oops", "x"), "Oops\nx");
        assert_eq!(render("", "x"), "x");
    }
}
