use std::fmt::Write;

use crate::service::data::ProcessedImage;

const PAGE_HEAD: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Pose Estimation</title>
  <style>
    body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 56rem; padding: 0 1rem; }
    form { display: flex; gap: 0.75rem; align-items: center; margin-bottom: 1.5rem; }
    figure { margin: 0; }
    img { max-width: 100%; border: 1px solid #ccc; }
    .phase { font-weight: 600; }
    ul.feedback { padding-left: 1.25rem; }
  </style>
</head>
<body>
  <h1>Pose Estimation</h1>
  <form method="post" action="/" enctype="multipart/form-data">
    <input type="file" name="image" accept="image/*" required />
    <button type="submit">Upload</button>
  </form>
"#;

const PAGE_TAIL: &str = "</body>\n</html>\n";

/// Upload form, optionally followed by a processed result.
pub fn render_page(result: Option<&ProcessedImage>) -> String {
    let mut html = String::with_capacity(PAGE_HEAD.len() + 1024);
    html.push_str(PAGE_HEAD);

    if let Some(image) = result {
        let name = escape(&image.original_filename);
        let _ = write!(
            html,
            "  <figure>\n    <img src=\"{url}\" alt=\"{name}\" width=\"{w}\" height=\"{h}\" />\n    <figcaption>{name}</figcaption>\n  </figure>\n",
            url = image.url(),
            w = image.width,
            h = image.height,
        );
        match &image.analysis {
            Some(analysis) => {
                let _ = writeln!(html, "  <p class=\"phase\">{}</p>", escape(analysis.summary));
                if !analysis.feedback.is_empty() {
                    html.push_str("  <ul class=\"feedback\">\n");
                    for message in &analysis.feedback {
                        let _ = writeln!(html, "    <li>{}</li>", escape(message));
                    }
                    html.push_str("  </ul>\n");
                }
            }
            None => html.push_str("  <p>No person detected in the image.</p>\n"),
        }
    }

    html.push_str(PAGE_TAIL);
    html
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}
