//! HTML pages for the upload form and match results.

use biocast_core::PresentedMatch;

pub const TITLE: &str = "BioCast: Biopic Casting Recommendation";
pub const INSTRUCTIONS: &str = "Upload an image, and we'll recommend the best-matching actors.";
pub const NO_FACE_MESSAGE: &str = "No face detected! Try another image.";
pub const FAILURE_MESSAGE: &str = "Could not process the uploaded image. Try another image.";

/// A match plus its display photo, if one was found and readable.
pub struct RenderedMatch {
    pub presented: PresentedMatch,
    /// `data:` URI of the representative photo.
    pub image_uri: Option<String>,
}

/// Idle state: instructions and the upload form.
pub fn index_page() -> String {
    page("")
}

/// Results state: the upload followed by up to three recommendations.
pub fn results_page(upload_uri: &str, matches: &[RenderedMatch]) -> String {
    let mut body = uploaded_figure(upload_uri);
    body.push_str("<h2>Recommended Actors:</h2>\n<ol class=\"matches\">\n");
    for m in matches {
        body.push_str(&match_item(m));
    }
    body.push_str("</ol>\n");
    page(&body)
}

/// Error state after a successful decode that found no face.
pub fn no_face_page(upload_uri: &str) -> String {
    let mut body = uploaded_figure(upload_uri);
    body.push_str(&error_box(NO_FACE_MESSAGE));
    page(&body)
}

/// Error state for anything that stopped the pipeline.
pub fn failure_page(message: &str) -> String {
    page(&error_box(message))
}

fn match_item(m: &RenderedMatch) -> String {
    let p = &m.presented;
    match (&m.image_uri, p.degraded_line()) {
        (_, Some(line)) => format!("<li class=\"degraded\">{}</li>\n", escape(&line)),
        (Some(uri), None) => format!(
            "<li><figure><img src=\"{}\" alt=\"{}\" width=\"200\"><figcaption>{}</figcaption></figure></li>\n",
            uri,
            escape(&p.label),
            escape(&p.caption())
        ),
        // Photo exists on disk but could not be read; fall back to text.
        (None, None) => format!("<li>{}. {}</li>\n", p.rank, escape(&p.caption())),
    }
}

fn uploaded_figure(upload_uri: &str) -> String {
    format!(
        "<figure class=\"upload\"><img src=\"{upload_uri}\" alt=\"Uploaded Image\"><figcaption>Uploaded Image</figcaption></figure>\n"
    )
}

fn error_box(message: &str) -> String {
    format!("<p class=\"error\" role=\"alert\">{}</p>\n", escape(message))
}

fn page(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{TITLE}</title>
<style>
body {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }}
.upload img {{ max-width: 100%; }}
.error {{ color: #a00; background: #fee; padding: 0.75rem; }}
.matches li {{ margin-bottom: 1rem; }}
</style>
</head>
<body>
<h1>{TITLE}</h1>
<p>{INSTRUCTIONS}</p>
<form action="/match" method="post" enctype="multipart/form-data" onsubmit="document.getElementById('busy').hidden = false">
<label>Upload an image of a real-life character
<input type="file" name="image" accept=".jpg,.jpeg,.png,image/jpeg,image/png" required></label>
<button type="submit">Find matches</button>
</form>
<p id="busy" hidden>Finding best actor matches...</p>
{body}</body>
</html>
"#
    )
}

/// Escape text for use in HTML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
