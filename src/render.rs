use std::fmt::Write;

use base64::{engine::general_purpose, Engine as _};

use crate::models::AnnotationResult;

/// Formats a confidence score as a percentage with two decimals, `0.8734` → `87.34%`.
pub fn format_score(score: f64) -> String {
    format!("{:.2}%", score * 100.0)
}

pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!(
        "data:{};base64,{}",
        escape_html(mime),
        general_purpose::STANDARD.encode(bytes)
    )
}

/// Renders the result page for an uploaded image and its labels.
///
/// Pure function of its inputs: the same image and labels always yield the same document.
pub fn render_labels(image: &[u8], mime: &str, result: &AnnotationResult) -> String {
    let mut items = String::new();
    for label in &result.labels {
        // writing into a String cannot fail
        let _ = writeln!(
            items,
            "        <li>{} <span class=\"score\">({})</span></li>",
            escape_html(&label.description),
            format_score(label.score)
        );
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Detected Labels</title>
    <link rel="stylesheet" href="/style.css">
</head>
<body>
    <div class="container">
        <h1>Detected Labels</h1>
        <img class="preview-image" src="{src}" alt="Uploaded image">
        <ul class="labels">
{items}        </ul>
        <a href="/">Upload Another Image</a>
    </div>
</body>
</html>
"#,
        src = data_uri(image, mime),
        items = items,
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;

    #[test]
    fn score_formatting() {
        assert_eq!(format_score(0.5), "50.00%");
        assert_eq!(format_score(1.0), "100.00%");
        assert_eq!(format_score(0.0), "0.00%");
        assert_eq!(format_score(0.8734), "87.34%");
    }

    #[test]
    fn score_rounding_uses_double_precision() {
        assert_eq!(format_score(0.00055), "0.06%");
        assert_eq!(format_score(0.00005), "0.01%");
    }

    #[test]
    fn one_item_per_label_in_order() {
        let result = AnnotationResult::new(vec![
            Label::new("Dog", 0.97),
            Label::new("Grass", 0.5),
            Label::new("Frisbee", 0.81),
        ]);
        let html = render_labels(b"img", "image/png", &result);

        assert_eq!(html.matches("<li>").count(), 3);
        let dog = html.find("<li>Dog").unwrap();
        let grass = html.find("<li>Grass").unwrap();
        let frisbee = html.find("<li>Frisbee").unwrap();
        assert!(dog < grass && grass < frisbee);
        assert!(html.contains("<li>Grass <span class=\"score\">(50.00%)</span></li>"));
    }

    #[test]
    fn empty_result_renders_empty_list() {
        let html = render_labels(b"img", "image/png", &AnnotationResult::default());
        assert!(html.contains("<ul class=\"labels\">\n        </ul>"));
        assert!(!html.contains("<li>"));
        assert!(html.contains("<h1>Detected Labels</h1>"));
    }

    #[test]
    fn embeds_image_as_data_uri() {
        let html = render_labels(&[0xff, 0xd8, 0xff], "image/jpeg", &AnnotationResult::default());
        assert!(html.contains("src=\"data:image/jpeg;base64,/9j/\""));
    }

    #[test]
    fn escapes_label_text() {
        let result = AnnotationResult::new(vec![Label::new("<script>\"x\" & 'y'", 0.1)]);
        let html = render_labels(b"", "image/png", &result);
        assert!(html.contains("&lt;script&gt;&quot;x&quot; &amp; &#39;y&#39;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let result = AnnotationResult::new(vec![Label::new("Cat", 0.9)]);
        assert_eq!(
            render_labels(b"same", "image/gif", &result),
            render_labels(b"same", "image/gif", &result)
        );
    }
}
