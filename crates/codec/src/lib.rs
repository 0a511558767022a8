//! `kh-codec` — translation between platform rich messages and the
//! canonical XML dialect the model reads and writes.
//!
//! The dialect is a flat sequence of `<p>` paragraphs. Inside a paragraph
//! only `mention`, `reply`, `image`, `face`, `br`, `code` and `tex` are
//! meaningful; everything else is either stripped or degraded to text.
//!
//! - [`encode`] turns inbound platform segments into one `<p>` fragment.
//! - [`sanitize`] repairs untrusted model output into canonical XML.
//! - [`decode`] turns model output into one platform message per `<p>`.

pub mod decode;
pub mod encode;
pub mod error;
pub mod escape;
pub mod formula;
pub mod image;
pub mod segment;
pub mod tables;

mod scanner;

pub use decode::{
    decode, decode_with, paragraphs, sanitize, sanitize_with, DecodeOptions, Decoded, Node,
    Paragraph,
};
pub use encode::{encode, EncodeContext, Encoded};
pub use error::CodecError;
pub use formula::{render_formulas, FormulaRenderer};
pub use image::{ImageSource, ImageStore, PassthroughImageStore};
pub use segment::{plain_text, Segment};
pub use tables::{FaceTable, NameDirectory};
