use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::processor::{AnalysisItem, DocumentRef, Renderer, ReportInput};

/// Renders a plain Markdown situation report.
pub struct MarkdownRenderer {
    output_directory: PathBuf,
    title: String,
}

impl MarkdownRenderer {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
            title: "Media Monitoring Report".to_string(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn file_name(input: &ReportInput) -> String {
        format!(
            "report_{}_{}.md",
            input.generated_at.format("%Y%m%d"),
            input.job_id
        )
    }

    fn render_markdown(&self, input: &ReportInput) -> String {
        let stats = &input.stats;
        let mut out = String::new();

        let _ = writeln!(out, "# {}", self.title);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Generated {} from `{}` (job {}).",
            input.generated_at.format("%Y-%m-%d %H:%M UTC"),
            input.filename,
            input.job_id
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "| Metric | Count |");
        let _ = writeln!(out, "| --- | ---: |");
        let _ = writeln!(out, "| Items received | {} |", stats.total_items);
        let _ = writeln!(out, "| Duplicates removed | {} |", stats.removed_duplicates);
        let _ = writeln!(out, "| Items retained | {} |", stats.retained_items);
        let _ = writeln!(out, "| Domestic sources | {} |", stats.domestic_items);
        let _ = writeln!(out, "| Foreign sources | {} |", stats.foreign_items);

        write_section(&mut out, "Domestic sources", &input.analysis.domestic);
        write_section(&mut out, "Foreign sources", &input.analysis.foreign);
        out
    }
}

fn write_section(out: &mut String, heading: &str, items: &[AnalysisItem]) {
    let _ = writeln!(out);
    let _ = writeln!(out, "## {} ({})", heading, items.len());
    let _ = writeln!(out);

    if items.is_empty() {
        let _ = writeln!(out, "_None._");
        return;
    }

    for (i, item) in items.iter().enumerate() {
        let title = item.title.as_deref().unwrap_or("(untitled)");
        match item.url.as_deref() {
            Some(url) => {
                let _ = write!(out, "{}. [{}]({})", i + 1, title, url);
            }
            None => {
                let _ = write!(out, "{}. {}", i + 1, title);
            }
        }
        let byline: Vec<&str> = [item.source_name.as_deref(), item.author.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !byline.is_empty() {
            let _ = write!(out, " ({})", byline.join(", "));
        }
        let _ = writeln!(out);
        if let Some(summary) = item.summary.as_deref() {
            let _ = writeln!(out, "   > {}", summary.replace('\n', " "));
        }
    }
}

#[async_trait]
impl Renderer for MarkdownRenderer {
    async fn render(&self, input: &ReportInput) -> Result<DocumentRef, ProcessError> {
        tokio::fs::create_dir_all(&self.output_directory)
            .await
            .map_err(|e| {
                ProcessError::Render(format!(
                    "cannot create {}: {}",
                    self.output_directory.display(),
                    e
                ))
            })?;

        let path = self.output_directory.join(Self::file_name(input));
        let content = self.render_markdown(input);
        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(|e| ProcessError::Render(format!("cannot write {}: {}", path.display(), e)))?;

        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        log::debug!("Rendered report {}", path.display());

        Ok(DocumentRef {
            size_bytes: content.len() as u64,
            path,
            content_type,
        })
    }
}
