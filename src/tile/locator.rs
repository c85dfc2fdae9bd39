//! Locator templates map tile coordinates to resource locators.
//!
//! A locator doubles as the tile's identity inside its factory and as its
//! key in the image cache, so two coordinates must never share one.

use crate::error::TemplateError;

/// Produces the resource locator for a tile.
pub trait LocatorTemplate: Send + Sync {
    fn locator(&self, x: i32, y: i32, zoom: u32) -> String;
}

impl<F> LocatorTemplate for F
where
    F: Fn(i32, i32, u32) -> String + Send + Sync,
{
    fn locator(&self, x: i32, y: i32, zoom: u32) -> String {
        self(x, y, zoom)
    }
}

/// URL template with `{x}`, `{y}` and `{z}` placeholders.
///
/// ```
/// use mapview_tiles::tile::{LocatorTemplate, UrlTemplate};
///
/// let template = UrlTemplate::parse("https://tile.example.org/{z}/{x}/{y}.png").unwrap();
/// assert_eq!(template.locator(3, 5, 4), "https://tile.example.org/4/3/5.png");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
}

impl UrlTemplate {
    /// Parse a template, requiring all three placeholders.
    pub fn parse(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = template.into();
        for placeholder in ["{x}", "{y}", "{z}"] {
            if !template.contains(placeholder) {
                return Err(TemplateError::MissingPlaceholder {
                    template,
                    placeholder,
                });
            }
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

impl LocatorTemplate for UrlTemplate {
    fn locator(&self, x: i32, y: i32, zoom: u32) -> String {
        self.template
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
            .replace("{z}", &zoom.to_string())
    }
}
