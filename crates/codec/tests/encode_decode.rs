use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use kh_codec::{
    decode_with, encode, render_formulas, DecodeOptions, EncodeContext, FaceTable,
    FormulaRenderer, ImageSource, ImageStore, NameDirectory, PassthroughImageStore, Segment,
};

#[derive(Default)]
struct MemoryStore {
    files: HashMap<String, Vec<u8>>,
    uploads: Mutex<Vec<ImageSource>>,
    fail_upload: bool,
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn fetch(&self, url: &str) -> kh_domain::Result<Vec<u8>> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| kh_domain::Error::Http(format!("404 {url}")))
    }

    async fn upload(&self, source: ImageSource) -> kh_domain::Result<String> {
        if self.fail_upload {
            return Err(kh_domain::Error::Http("upload refused".into()));
        }
        let mut uploads = self.uploads.lock();
        uploads.push(source);
        Ok(format!("https://host/{}", uploads.len()))
    }
}

fn tiny_gif() -> Vec<u8> {
    use image::{Frame, Rgba, RgbaImage};
    let mut buf = Vec::new();
    {
        let mut encoder = image::codecs::gif::GifEncoder::new(&mut buf);
        encoder
            .encode_frame(Frame::new(RgbaImage::from_pixel(1, 1, Rgba([0, 255, 0, 255]))))
            .unwrap();
    }
    buf
}

fn faces() -> FaceTable {
    FaceTable::from_map(HashMap::from([("14".to_string(), "smile".to_string())]))
}

#[tokio::test]
async fn encodes_text_mentions_and_replies() {
    let faces = faces();
    let names = NameDirectory::new();
    let store = PassthroughImageStore;
    let ctx = EncodeContext { store: &store, faces: &faces, names: &names };

    let segments = vec![
        Segment::reply("77"),
        Segment::Mention { uid: "123456789".into(), name: Some("Alice".into()) },
        Segment::text(" 1 < 2\nok"),
        Segment::mention("987654321"),
    ];
    let encoded = encode(&segments, Some("m1"), &ctx).await;
    assert_eq!(
        encoded.xml,
        r#"<p msgid="m1"><reply id="77"/><mention uid="123456789">Alice</mention> 1 &lt; 2<br/>ok<mention uid="987654321">98765</mention></p>"#
    );
    assert!(encoded.images.is_empty());
    assert_eq!(names.name_of("123456789").as_deref(), Some("Alice"));
}

#[tokio::test]
async fn placeholders_for_unrepresentable_segments() {
    let faces = faces();
    let names = NameDirectory::new();
    let store = PassthroughImageStore;
    let ctx = EncodeContext { store: &store, faces: &faces, names: &names };

    let segments = vec![
        Segment::Face { id: "14".into() },
        Segment::Face { id: "999".into() },
        Segment::Voice,
        Segment::Other { kind: "file".into() },
    ];
    let encoded = encode(&segments, None, &ctx).await;
    assert_eq!(
        encoded.xml,
        r#"<p><face id="14" name="smile"/><face id="999" name="notfound"/>[voice][file]</p>"#
    );
}

#[tokio::test]
async fn encode_then_decode_preserves_structure() {
    let faces = faces();
    let names = NameDirectory::new();
    let store = PassthroughImageStore;
    let ctx = EncodeContext { store: &store, faces: &faces, names: &names };

    let segments = vec![
        Segment::reply("5"),
        Segment::Mention { uid: "42".into(), name: Some("Bob".into()) },
        Segment::text(" hello\nworld"),
        Segment::image("http://cdn/x.png"),
        Segment::Face { id: "14".into() },
    ];
    let encoded = encode(&segments, Some("m9"), &ctx).await;
    assert_eq!(encoded.images, vec!["http://cdn/x.png".to_string()]);

    let opts = DecodeOptions { faces: &faces, face_mismatch_as_image: true };
    let messages: Vec<_> = decode_with(&encoded.xml, opts).unwrap().collect();
    assert_eq!(
        messages,
        vec![vec![
            Segment::reply("5"),
            Segment::mention("42"),
            Segment::text(" hello\nworld"),
            Segment::image("http://cdn/x.png"),
            Segment::Face { id: "14".into() },
        ]]
    );
}

#[tokio::test]
async fn gif_is_rehosted_as_png() {
    let mut store = MemoryStore::default();
    store.files.insert("http://cdn/a.gif".into(), tiny_gif());
    let faces = faces();
    let names = NameDirectory::new();
    let ctx = EncodeContext { store: &store, faces: &faces, names: &names };

    let encoded = encode(&[Segment::image("http://cdn/a.gif")], None, &ctx).await;
    assert_eq!(encoded.xml, r#"<p><image url="https://host/1"/></p>"#);
    assert_eq!(encoded.images, vec!["https://host/1".to_string()]);

    let uploads = store.uploads.lock();
    match &uploads[0] {
        ImageSource::Bytes(png) => assert!(png.starts_with(&[0x89, b'P', b'N', b'G'])),
        other => panic!("expected png bytes, got {other:?}"),
    }
}

#[tokio::test]
async fn still_image_is_uploaded_by_url() {
    let mut store = MemoryStore::default();
    store.files.insert("http://cdn/b.jpg".into(), vec![0xFF, 0xD8, 0xFF]);
    let faces = faces();
    let names = NameDirectory::new();
    let ctx = EncodeContext { store: &store, faces: &faces, names: &names };

    let encoded = encode(&[Segment::image("http://cdn/b.jpg")], None, &ctx).await;
    assert_eq!(encoded.images, vec!["https://host/1".to_string()]);
    assert_eq!(
        store.uploads.lock()[0],
        ImageSource::Url("http://cdn/b.jpg".into())
    );
}

#[tokio::test]
async fn failed_gif_upload_inlines_png() {
    let mut store = MemoryStore { fail_upload: true, ..Default::default() };
    store.files.insert("http://cdn/s.gif".into(), tiny_gif());
    let faces = faces();
    let names = NameDirectory::new();
    let ctx = EncodeContext { store: &store, faces: &faces, names: &names };

    let sticker = Segment::Sticker { url: "http://cdn/s.gif".into(), summary: Some("cat".into()) };
    let encoded = encode(&[sticker], None, &ctx).await;
    assert_eq!(encoded.xml, r#"<p><image name="cat"/></p>"#);
    assert!(encoded.images[0].starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn fetch_failure_keeps_original_url() {
    let store = MemoryStore::default();
    let faces = faces();
    let names = NameDirectory::new();
    let ctx = EncodeContext { store: &store, faces: &faces, names: &names };

    let encoded = encode(&[Segment::image("http://gone/x.png")], None, &ctx).await;
    assert_eq!(encoded.xml, r#"<p><image url="http://gone/x.png"/></p>"#);
    assert!(store.uploads.lock().is_empty());
}

struct PickyRenderer;

#[async_trait]
impl FormulaRenderer for PickyRenderer {
    async fn render(&self, tex: &str) -> kh_domain::Result<String> {
        if tex.contains("bad") {
            Err(kh_domain::Error::Other("parse error".into()))
        } else {
            Ok(format!("https://tex/{}", tex.len()))
        }
    }
}

#[tokio::test]
async fn formulas_render_or_fall_back_to_text() {
    let msg = vec![
        Segment::text("area: "),
        Segment::Formula { tex: "\\pi r^2".into() },
        Segment::text(" and "),
        Segment::Formula { tex: "bad{".into() },
    ];
    let rendered = render_formulas(msg, &PickyRenderer).await;
    assert_eq!(
        rendered,
        vec![
            Segment::text("area: "),
            Segment::image("https://tex/7"),
            Segment::text(" and $bad{$"),
        ]
    );
}
