//! Pairing page rendering.

use axum::response::Html;
use qrcode::render::svg;
use qrcode::QrCode;

use crate::facade::QrView;

const ALREADY_CONNECTED: &str = "<html><body><h1>Already Connected</h1></body></html>";
const NOT_YET_AVAILABLE: &str =
    "<html><body><h1>QR Code not available yet, please refresh</h1></body></html>";

/// Inline SVG for `token`, without the XML prolog.
pub fn render_svg(token: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(token.as_bytes())?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(match image.find("<svg") {
        Some(start) => image[start..].to_string(),
        None => image,
    })
}

pub fn page(view: &QrView) -> Result<Html<String>, qrcode::types::QrError> {
    let body = match view {
        QrView::AlreadyConnected => ALREADY_CONNECTED.to_string(),
        QrView::NotYetAvailable => NOT_YET_AVAILABLE.to_string(),
        QrView::Pending(token) => format!(
            "<html><body><h1>Scan QR Code</h1>{}</body></html>",
            render_svg(token)?
        ),
    };
    Ok(Html(body))
}
