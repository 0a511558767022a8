/// Errors surfaced by the codec.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The document was recovered but contains no paragraph to send.
    #[error("no paragraphs in model output")]
    NoParagraphs,

    /// The scanner gave up on the document. Never returned by
    /// [`crate::decode`], which degrades to plain text instead.
    #[error("malformed protocol document: {0}")]
    Malformed(String),

    #[error("image conversion failed: {0}")]
    Image(String),
}
