use crate::dom::{Document, Element, Node};

pub const FIXES_STYLE_ID: &str = "xenforo-offline-fixes";
const VIEWPORT_CONTENT: &str = "width=device-width, initial-scale=1.0";

const FIXES_CSS: &str = r#"
/* restored offline layout */

/* dark fallback for backgrounds that could not be fetched */
body, html {
    background: #3a3a3a !important;
    margin: 0;
    padding: 0;
}

.p-pageWrapper {
    max-width: 1280px !important;
    margin: 20px auto !important;
    background: #ffffff !important;
    box-shadow: 0 0 15px rgba(0,0,0,0.12) !important;
    border-radius: 6px;
    overflow: hidden;
}
.p-body { background: transparent !important; padding: 20px 15px !important; }
.p-body-inner, .pageContent { max-width: 100% !important; margin: 0 auto !important; }

.message, .message--post, .block--messages .message {
    background: #fff !important;
    border: 1px solid #d8d8d8 !important;
    border-radius: 4px !important;
    margin-bottom: 20px !important;
    box-shadow: 0 1px 3px rgba(0,0,0,0.05) !important;
}
.message .message-inner { display: flex !important; }
.message-cell--user { background: #f8f9fa !important; border-right: 1px solid #e5e5e5 !important; padding: 15px 12px !important; width: 140px !important; }
.message-cell--main { padding: 15px !important; flex: 1 !important; }

.attachment, .attachment-icon, .bbImageWrapper .thumbnail, .thumbnail {
    border: 1px solid #ddd !important;
    background: #fafafa !important;
    padding: 6px !important;
    margin: 8px 0 !important;
    max-width: 240px !important;
}
.attachment .thumbnail img, .bbImageWrapper img {
    max-height: 200px !important;
    max-width: 100% !important;
    height: auto !important;
}

/* constrain width only; forcing height distorts inline images */
img.bbImage, .bbCodeImage, .message img:not(.avatar) {
    max-width: 100% !important;
    width: auto !important;
    height: auto !important;
    border: 1px solid #eee !important;
    display: block !important;
    margin: 4px 0 !important;
}

.p-nav, .p-header { background: #2a2a2a !important; color: #fff !important; }
.block, .block-container { border: 1px solid #e0e0e0 !important; }
"#;

/// Adds the viewport meta tag and the layout stylesheet unless already present.
pub fn inject_fixes(mut doc: Document) -> Document {
    let mut has_viewport = false;
    let mut has_fixes = false;
    doc.for_each_element(|el| {
        if el.is("meta") && el.attr("name").is_some_and(|n| n.eq_ignore_ascii_case("viewport")) {
            has_viewport = true;
        }
        if el.is("style") && el.attr("id") == Some(FIXES_STYLE_ID) {
            has_fixes = true;
        }
    });

    let head = doc.head_mut();
    if !has_viewport {
        let meta = Element::new("meta")
            .with_attr("name", "viewport")
            .with_attr("content", VIEWPORT_CONTENT);
        head.children.push(Node::Element(meta));
    }
    if !has_fixes {
        let mut style = Element::new("style").with_attr("id", FIXES_STYLE_ID);
        style.set_text(FIXES_CSS);
        head.children.push(Node::Element(style));
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_is_idempotent() {
        let doc = Document::parse("<html><head><title>t</title></head><body></body></html>");
        let once = inject_fixes(doc);
        let twice = inject_fixes(once.clone());

        assert_eq!(once, twice);
        let html = twice.to_html();
        assert_eq!(html.matches(FIXES_STYLE_ID).count(), 1);
        assert_eq!(html.matches("name=\"viewport\"").count(), 1);
    }

    #[test]
    fn keeps_existing_viewport() {
        let doc = Document::parse(
            r#"<html><head><meta name="viewport" content="width=980"></head><body></body></html>"#,
        );
        let html = inject_fixes(doc).to_html();
        assert!(html.contains("width=980"));
        assert!(!html.contains(VIEWPORT_CONTENT));
    }
}
