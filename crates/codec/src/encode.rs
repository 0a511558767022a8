//! Platform message → one `<p>` fragment of the dialect.

use crate::escape::{escape_attr, escape_text};
use crate::image::{data_url, gif_first_frame_png, is_gif, ImageSource, ImageStore};
use crate::segment::Segment;
use crate::tables::{FaceTable, NameDirectory};

/// Everything `encode` needs besides the message itself.
pub struct EncodeContext<'a> {
    pub store: &'a dyn ImageStore,
    pub faces: &'a FaceTable,
    pub names: &'a NameDirectory,
}

impl<'a> EncodeContext<'a> {
    /// Context over the process-wide tables.
    pub fn new(store: &'a dyn ImageStore) -> Self {
        Self {
            store,
            faces: FaceTable::global(),
            names: NameDirectory::global(),
        }
    }
}

/// Result of encoding one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Encoded {
    pub xml: String,
    /// Resolved image references (URLs or `data:` payloads), in order.
    pub images: Vec<String>,
}

pub async fn encode(
    segments: &[Segment],
    msg_id: Option<&str>,
    ctx: &EncodeContext<'_>,
) -> Encoded {
    let mut body = String::new();
    let mut images = Vec::new();

    for seg in segments {
        match seg {
            Segment::Text { text } => {
                let mut lines = text.split('\n');
                if let Some(first) = lines.next() {
                    body.push_str(&escape_text(first));
                }
                for line in lines {
                    body.push_str("<br/>");
                    body.push_str(&escape_text(line));
                }
            }
            Segment::Mention { uid, name } => {
                let name = match name {
                    Some(n) if !n.is_empty() => {
                        ctx.names.remember(uid, n);
                        n.clone()
                    }
                    _ => ctx.names.display_name(uid),
                };
                body.push_str(&format!(
                    "<mention uid=\"{}\">{}</mention>",
                    escape_attr(uid),
                    escape_text(&name)
                ));
            }
            Segment::Reply { id } => {
                body.push_str(&format!("<reply id=\"{}\"/>", escape_attr(id)));
            }
            Segment::Image { url } => {
                let resolved = resolve_image(ctx.store, url).await;
                body.push_str(&image_tag(&resolved, "image"));
                images.push(resolved);
            }
            Segment::Sticker { url, summary } => {
                let resolved = resolve_image(ctx.store, url).await;
                let label = summary.as_deref().filter(|s| !s.is_empty()).unwrap_or("image");
                body.push_str(&image_tag(&resolved, label));
                images.push(resolved);
            }
            Segment::NamedImage { name } => {
                body.push_str(&format!("<image name=\"{}\"/>", escape_attr(name)));
            }
            Segment::Face { id } => {
                let name = ctx.faces.name_of(id).unwrap_or("notfound");
                body.push_str(&format!(
                    "<face id=\"{}\" name=\"{}\"/>",
                    escape_attr(id),
                    escape_attr(name)
                ));
            }
            Segment::Voice => body.push_str("[voice]"),
            Segment::Code { lang, text } => body.push_str(&format!(
                "<code lang=\"{}\">{}</code>",
                escape_attr(lang),
                escape_text(text)
            )),
            Segment::Formula { tex } => {
                body.push_str(&format!("<tex>{}</tex>", escape_text(tex)))
            }
            Segment::Other { kind } => body.push_str(&escape_text(&format!("[{kind}]"))),
        }
    }

    let xml = match msg_id {
        Some(id) => format!("<p msgid=\"{}\">{body}</p>", escape_attr(id)),
        None => format!("<p>{body}</p>"),
    };
    Encoded { xml, images }
}

fn image_tag(resolved: &str, label: &str) -> String {
    if resolved.starts_with("http") {
        format!("<image url=\"{}\"/>", escape_attr(resolved))
    } else {
        format!("<image name=\"{}\"/>", escape_attr(label))
    }
}

/// Re-host an image so the model can load it. Errors keep the original URL.
async fn resolve_image(store: &dyn ImageStore, url: &str) -> String {
    let bytes = match store.fetch(url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(url, error = %e, "image fetch failed, keeping original url");
            return url.to_string();
        }
    };

    if !is_gif(&bytes) {
        return match store.upload(ImageSource::Url(url.to_string())).await {
            Ok(hosted) => hosted,
            Err(e) => {
                tracing::warn!(url, error = %e, "image upload failed, keeping original url");
                url.to_string()
            }
        };
    }

    let png = match gif_first_frame_png(&bytes) {
        Ok(png) => png,
        Err(e) => {
            tracing::warn!(url, error = %e, "gif conversion failed, keeping original url");
            return url.to_string();
        }
    };
    match store.upload(ImageSource::Bytes(png.clone())).await {
        Ok(hosted) => hosted,
        Err(e) => {
            tracing::warn!(url, error = %e, "png upload failed, inlining");
            data_url("image/png", &png)
        }
    }
}
