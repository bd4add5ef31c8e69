use crate::context::Context;
use crate::deploy::config_diff::{self, DiffView};
use anyhow::Result;
use std::path::Path;

/// Handles the 'diff' command - summarizes changes between two config snapshots
pub struct DiffCommand;

impl DiffCommand {
    pub fn execute(ctx: &Context, before: &Path, after: &Path, view: DiffView) -> Result<()> {
        let diff = config_diff::diff_config(ctx.fs.as_ref(), before, after)?;

        ctx.output.section(view.title());
        ctx.output.key_value("Before", &before.display().to_string());
        ctx.output.key_value("After", &after.display().to_string());
        ctx.output.blank();

        let rows = diff.rows();
        if rows.iter().all(|(_, counts)| counts.is_empty()) {
            ctx.output.dimmed("No configuration found in either directory.");
            return Ok(());
        }
        for (key, counts) in rows {
            ctx.output.key_value(&key, &view.format(&counts));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockContainerRuntime, MockFileSystem, MockOutput, MockUserInput};
    use std::sync::Arc;

    fn ctx_with(fs: MockFileSystem) -> (Context, Arc<MockOutput>) {
        let output = Arc::new(MockOutput::new());
        let ctx = Context::test_with(
            Arc::new(fs),
            Arc::new(MockUserInput::new()),
            output.clone(),
            Arc::new(MockContainerRuntime::empty()),
        );
        (ctx, output)
    }

    #[test]
    fn test_merge_view_rows() {
        let fs = MockFileSystem::new()
            .with_file(
                "/before/functions.yml",
                "functions:\n  a: {image: a}\n  b: {image: b}\n",
            )
            .with_file(
                "/after/functions.yml",
                "functions:\n  a: {image: a2}\n  c: {image: c}\n",
            );
        let (ctx, output) = ctx_with(fs);

        DiffCommand::execute(&ctx, Path::new("/before"), Path::new("/after"), DiffView::Merge).unwrap();

        assert_eq!(
            output.value_for("Functions").as_deref(),
            Some("new 1 / updated 1 / removed 1 (total 2)")
        );
        assert_eq!(
            output.value_for("Routes").as_deref(),
            Some("new 0 / updated 0 / removed 0 (total 0)")
        );
    }

    #[test]
    fn test_template_view_rows() {
        let fs = MockFileSystem::new()
            .with_file("/before/functions.yml", "functions:\n  a: {image: a}\n")
            .with_file(
                "/after/functions.yml",
                "functions:\n  a: {image: a}\n  c: {image: c}\n",
            );
        let (ctx, output) = ctx_with(fs);

        DiffCommand::execute(&ctx, Path::new("/before"), Path::new("/after"), DiffView::TemplateDelta).unwrap();

        assert_eq!(
            output.value_for("Functions").as_deref(),
            Some("new 1 / updated 0 / unchanged 1 (template 2)")
        );
    }

    #[test]
    fn test_empty_directories() {
        let fs = MockFileSystem::new().with_dir("/before").with_dir("/after");
        let (ctx, output) = ctx_with(fs);

        DiffCommand::execute(&ctx, Path::new("/before"), Path::new("/after"), DiffView::Merge).unwrap();

        assert!(output.value_for("Functions").is_none());
        assert!(output.to_text().contains("No configuration found"));
    }

    #[test]
    fn test_malformed_snapshot_fails() {
        let fs = MockFileSystem::new()
            .with_file("/before/routing.yml", "routes: [oops")
            .with_dir("/after");
        let (ctx, _) = ctx_with(fs);

        let err = DiffCommand::execute(&ctx, Path::new("/before"), Path::new("/after"), DiffView::Merge)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("/before"));
    }
}
