//! Navigation-snippet injection (spec.md §4.3 step 6, §9). Syntactic
//! only: splice before `</body>`, never parse HTML.

use anyhow::{Context, Result};

use crate::domain::{RefKind, RepoId, TrackedTarget};

/// Walk `out_dir` recursively and inject the snippet into every `.html`
/// file that has a closing body tag. Files without one are left
/// untouched. Returns the number of files modified.
pub async fn inject_into_tree(
    out_dir: &std::path::Path,
    repo_id: RepoId,
    target: &TrackedTarget,
    version: &str,
) -> Result<usize> {
    let snippet = build_snippet(repo_id, target.ref_kind, &target.ref_name, &target.slug(), version);
    let mut injected = 0;
    let mut stack = vec![out_dir.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to read {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("html")) {
                let original = tokio::fs::read_to_string(&path).await?;
                if let Some(modified) = splice_before_closing_body(&original, &snippet) {
                    tokio::fs::write(&path, modified).await?;
                    injected += 1;
                }
            }
        }
    }

    Ok(injected)
}

fn build_snippet(repo_id: RepoId, ref_kind: RefKind, ref_name: &str, slug: &str, version: &str) -> String {
    format!(
        "<script>\nwindow.__DOCSMITH_REPO_ID = {repo_id};\nwindow.__DOCSMITH_TARGET_SLUG = \"{slug}\";\nwindow.__DOCSMITH_REF_KIND = \"{ref_kind}\";\nwindow.__DOCSMITH_REF_NAME = \"{ref_name}\";\nwindow.__DOCSMITH_VERSION = \"{version}\";\n</script>\n"
    )
}

fn splice_before_closing_body(html: &str, snippet: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let idx = lower.rfind("</body>")?;
    let mut out = String::with_capacity(html.len() + snippet.len());
    out.push_str(&html[..idx]);
    out.push_str(snippet);
    out.push_str(&html[idx..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splices_immediately_before_closing_body_tag() {
        let html = "<html><body><h1>hi</h1></body></html>";
        let out = splice_before_closing_body(html, "<script>X</script>\n").unwrap();
        assert!(out.contains("<script>X</script>\n</body>"));
    }

    #[test]
    fn leaves_file_without_closing_body_tag_untouched() {
        let html = "<html><body><h1>no closing tag</h1>";
        assert!(splice_before_closing_body(html, "<script>X</script>").is_none());
    }

    #[test]
    fn matches_uppercase_closing_body_tag() {
        let html = "<HTML><BODY>hi</BODY></HTML>";
        assert!(splice_before_closing_body(html, "X").is_some());
    }
}
