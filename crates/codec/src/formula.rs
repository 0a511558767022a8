use async_trait::async_trait;

use crate::segment::Segment;

/// Renders a TeX formula to an image URL.
#[async_trait]
pub trait FormulaRenderer: Send + Sync {
    async fn render(&self, tex: &str) -> kh_domain::Result<String>;
}

/// Replace every `Formula` segment with a rendered image. A formula that
/// fails to render is kept as `$tex$` text.
pub async fn render_formulas(msg: Vec<Segment>, renderer: &dyn FormulaRenderer) -> Vec<Segment> {
    let mut out = Vec::with_capacity(msg.len());
    for seg in msg {
        match seg {
            Segment::Formula { tex } => match renderer.render(&tex).await {
                Ok(url) => out.push(Segment::Image { url }),
                Err(e) => {
                    tracing::warn!(error = %e, "formula render failed");
                    let text = format!("${tex}$");
                    match out.last_mut() {
                        Some(Segment::Text { text: prev }) => prev.push_str(&text),
                        _ => out.push(Segment::Text { text }),
                    }
                }
            },
            other => out.push(other),
        }
    }
    out
}
