use askama::Template;
use url::form_urlencoded;

use crate::application::stage::EngineError;
use crate::domain::page_format::PageFormat;

const GOOGLE_FONTS_CSS2: &str = "https://fonts.googleapis.com/css2";
const FONT_WEIGHTS: &str = "wght@100;200;300;400;500;600;700;800;900";

/// Printable HTML wrapper around a rendered template body.
#[derive(Template)]
#[template(path = "document.html")]
pub struct DocumentShell {
    title: &'static str,
    font_href: Option<String>,
    font_family: Option<String>,
    page_size: &'static str,
    body: String,
}

impl DocumentShell {
    pub fn new(body: String, fonts: &[String], format: PageFormat) -> Self {
        let families: Vec<&str> = fonts
            .iter()
            .map(|font| font.trim())
            .filter(|font| !font.is_empty())
            .collect();
        Self {
            title: "Preview",
            font_href: font_import_href(&families),
            font_family: families.first().map(|family| css_font_family(family)),
            page_size: format.css_size(),
            body,
        }
    }

    pub fn render_html(&self) -> Result<String, EngineError> {
        self.render()
            .map_err(|err| EngineError::new(format!("document shell: {err}")))
    }
}

/// Google Fonts CSS2 URL importing every family, the first one with all weights.
pub fn font_import_href(families: &[&str]) -> Option<String> {
    let (first, rest) = families.split_first()?;
    let mut href = format!("{GOOGLE_FONTS_CSS2}?family={}:{FONT_WEIGHTS}", encode(first));
    for family in rest {
        href.push_str("&display=swap&family=");
        href.push_str(&encode(family));
    }
    Some(href)
}

fn encode(family: &str) -> String {
    form_urlencoded::byte_serialize(family.as_bytes()).collect()
}

// Emitted raw inside <style>, so anything that could close the string or rule goes.
fn css_font_family(family: &str) -> String {
    family
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '\\' | '<' | '>' | ';' | '{' | '}'))
        .collect()
}
