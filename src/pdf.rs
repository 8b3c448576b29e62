//! One-page A4 invoice rendering.
//!
//! Rendering happens in two steps. [`layout_invoice`] turns an invoice and the
//! company settings into a [`PageLayout`]: a flat list of rectangles, text runs
//! and an optional logo slot, all positioned in PDF points with the origin at
//! the bottom-left corner. [`render_invoice_pdf`] then paints that layout with
//! `printpdf`, embedding DejaVu Sans so Latin Extended, Greek and Cyrillic
//! names print as written.
//!
//! The same invoice always renders to the same bytes.

use std::io::Cursor;

use base64::Engine as _;
use printpdf::image_crate::{self, DynamicImage, GenericImageView as _, ImageFormat};
use printpdf::path::PaintMode;
use printpdf::{
    Color, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument,
    PdfLayerReference, Pt, Rect, Rgb,
};
use time::OffsetDateTime;

use crate::error::{InvoiceError, Result};
use crate::models::HydratedInvoice;
use crate::settings::{
    Settings, COMPANY_ADDRESS, COMPANY_EMAIL, COMPANY_NAME, COMPANY_PHONE, COMPANY_TAX,
    FOOTER_TEXT, PAYMENT_TERMS,
};
use crate::status::parse_timestamp;

pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;

const MARGIN: f32 = 40.0;
const PANEL_INSET: f32 = 24.0;
const LINE_STEP: f32 = 14.0;

const LOGO_BOX_W: f32 = 90.0;
const LOGO_BOX_H: f32 = 60.0;
const LOGO_DPI: f32 = 72.0;

const TABLE_TOP: f32 = PAGE_HEIGHT - 290.0;
const FOOTER_Y: f32 = 48.0;
const DESCRIPTION_MAX_CHARS: usize = 44;
const NOTES_MAX_CHARS: usize = 90;
const NOTES_MAX_LINES: usize = 4;

static FONT_REGULAR: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
static FONT_BOLD: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

/// Length of each of the two trailer `/ID` strings printpdf writes.
const TRAILER_ID_LEN: usize = 32;

const FALLBACK_COMPANY: &str = "Company";
const FALLBACK_TERMS: &str = "Due on receipt.";
const FALLBACK_FOOTER: &str = "Thank you for your business.";

/// An RGB colour with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tint {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Tint {
    const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

const PAGE_BG: Tint = Tint::new(0.11, 0.14, 0.2);
const PANEL_BG: Tint = Tint::new(0.07, 0.09, 0.13);
const ACCENT: Tint = Tint::new(0.24, 0.59, 0.98);
const HEADER_BG: Tint = Tint::new(0.14, 0.18, 0.25);
const HEADER_TEXT: Tint = Tint::new(0.8, 0.82, 0.9);
const FOOTER_TEXT_TINT: Tint = Tint::new(0.7, 0.72, 0.8);
const BODY_TEXT: Tint = Tint::new(0.95, 0.95, 0.96);

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    /// Filled rectangle; `(x, y)` is its bottom-left corner.
    Rect {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        tint: Tint,
    },
    /// Single text run; `(x, y)` is the baseline start.
    Text {
        x: f32,
        y: f32,
        size: f32,
        bold: bool,
        tint: Tint,
        text: String,
    },
    /// Where the decoded company logo is drawn, already fitted.
    Logo { x: f32, y: f32, w: f32, h: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    pub ops: Vec<DrawOp>,
}

impl PageLayout {
    pub fn texts(&self) -> impl Iterator<Item = &str> + '_ {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn has_text(&self, needle: &str) -> bool {
        self.texts().any(|t| t == needle)
    }

    pub fn logo(&self) -> Option<(f32, f32, f32, f32)> {
        self.ops.iter().find_map(|op| match *op {
            DrawOp::Logo { x, y, w, h } => Some((x, y, w, h)),
            _ => None,
        })
    }
}

struct Builder {
    ops: Vec<DrawOp>,
}

impl Builder {
    fn rect(&mut self, x: f32, y: f32, w: f32, h: f32, tint: Tint) {
        self.ops.push(DrawOp::Rect { x, y, w, h, tint });
    }

    fn text(&mut self, text: impl Into<String>, x: f32, y: f32, size: f32, bold: bool, tint: Tint) {
        self.ops.push(DrawOp::Text {
            x,
            y,
            size,
            bold,
            tint,
            text: text.into(),
        });
    }

    fn body(&mut self, text: impl Into<String>, x: f32, y: f32, size: f32) {
        self.text(text, x, y, size, false, BODY_TEXT);
    }
}

/// Lays out `invoice` on a single page. `logo_px` is the pixel size of the
/// decoded company logo, if one is available.
pub fn layout_invoice(
    invoice: &HydratedInvoice,
    settings: &Settings,
    logo_px: Option<(u32, u32)>,
) -> PageLayout {
    let w = PAGE_WIDTH;
    let h = PAGE_HEIGHT;
    let mut b = Builder { ops: Vec::new() };

    b.rect(0.0, 0.0, w, h, PAGE_BG);
    b.rect(
        PANEL_INSET,
        PANEL_INSET,
        w - 2.0 * PANEL_INSET,
        h - 2.0 * PANEL_INSET,
        PANEL_BG,
    );

    // Header: logo (or placeholder) and company identity.
    match logo_px.filter(|(pw, ph)| *pw > 0 && *ph > 0) {
        Some((pw, ph)) => {
            let (lw, lh) = fit_logo(pw, ph);
            b.ops.push(DrawOp::Logo {
                x: MARGIN,
                y: h - 80.0 - lh,
                w: lw,
                h: lh,
            });
        }
        None => {
            b.rect(MARGIN, h - 120.0, 80.0, 40.0, ACCENT);
            b.text("INVOICE", MARGIN + 6.0, h - 98.0, 14.0, true, BODY_TEXT);
        }
    }

    let company_x = 140.0;
    let mut y = h - 70.0;
    b.text(
        settings.text(COMPANY_NAME).unwrap_or(FALLBACK_COMPANY),
        company_x,
        y,
        16.0,
        true,
        BODY_TEXT,
    );
    for key in [COMPANY_EMAIL, COMPANY_PHONE, COMPANY_ADDRESS] {
        if let Some(v) = settings.text(key) {
            y -= LINE_STEP;
            b.body(v, company_x, y, 10.0);
        }
    }
    if let Some(tax) = settings.text(COMPANY_TAX) {
        y -= LINE_STEP;
        b.body(format!("Tax: {tax}"), company_x, y, 10.0);
    }

    // Invoice metadata.
    let meta_x = w - 180.0;
    let mut y = h - 70.0;
    b.text("Invoice", meta_x, y, 16.0, true, ACCENT);
    y -= 18.0;
    b.body(format!("No: {}", invoice.display_number()), meta_x, y, 10.0);
    y -= LINE_STEP;
    b.body(format!("Date: {}", date_part(&invoice.date)), meta_x, y, 10.0);
    y -= LINE_STEP;
    let due = invoice
        .due_date
        .as_deref()
        .map(date_part)
        .filter(|d| !d.is_empty())
        .unwrap_or("-");
    b.body(format!("Due: {due}"), meta_x, y, 10.0);
    y -= LINE_STEP;
    b.body(
        format!("Status: {}", invoice.status.as_str().to_uppercase()),
        meta_x,
        y,
        10.0,
    );

    // Client block.
    let mut y = h - 170.0;
    b.text("Bill To", MARGIN, y, 12.0, true, ACCENT);
    y -= 16.0;
    let client_name = non_empty(invoice.client_name.as_deref()).unwrap_or("-");
    b.text(client_name, MARGIN, y, 11.0, true, BODY_TEXT);
    for v in [
        &invoice.client_email,
        &invoice.client_phone,
        &invoice.client_address,
    ] {
        if let Some(v) = non_empty(v.as_deref()) {
            y -= LINE_STEP;
            b.body(v, MARGIN, y, 10.0);
        }
    }

    // Summary panel.
    let sx = w - 220.0;
    b.rect(sx, h - 256.0, 180.0, 96.0, HEADER_BG);
    b.text("Summary", sx + 12.0, h - 182.0, 12.0, true, ACCENT);
    b.body(format!("Subtotal: {}", money(invoice.subtotal)), sx + 12.0, h - 202.0, 10.0);
    b.body(format!("VAT: {}", money(invoice.vat)), sx + 12.0, h - 218.0, 10.0);
    b.text(
        format!("Total: {}", money(invoice.total)),
        sx + 12.0,
        h - 240.0,
        12.0,
        true,
        BODY_TEXT,
    );

    // Items table.
    let col_desc = MARGIN + 8.0;
    let col_qty = w / 2.0;
    let col_unit = w / 2.0 + 60.0;
    let col_total = w - 120.0;

    let mut y = TABLE_TOP;
    b.rect(MARGIN, y - 6.0, w - 2.0 * MARGIN, 22.0, HEADER_BG);
    for (label, x) in [
        ("Description", col_desc),
        ("Qty", col_qty),
        ("Unit", col_unit),
        ("Total", col_total),
    ] {
        b.text(label, x, y, 10.0, true, HEADER_TEXT);
    }

    let notes = notes_lines(&invoice.notes);
    // Items may use the space down to the notes, terms and footer.
    let rows_floor = FOOTER_Y + LINE_STEP * (notes.len() as f32 + 3.0) + 12.0;
    let capacity = (((y - 8.0 - rows_floor) / LINE_STEP).floor().max(1.0)) as usize;

    let item_count = invoice.items.len();
    let (shown, hidden) = if item_count > capacity {
        (capacity - 1, item_count - (capacity - 1))
    } else {
        (item_count, 0)
    };

    y -= 8.0;
    for item in invoice.items.iter().take(shown) {
        y -= LINE_STEP;
        b.body(truncate(&item.description, DESCRIPTION_MAX_CHARS), col_desc, y, 10.0);
        b.body(quantity(item.quantity), col_qty, y, 10.0);
        b.body(money(item.unit_price), col_unit, y, 10.0);
        b.body(money(item.total), col_total, y, 10.0);
    }
    if hidden > 0 {
        y -= LINE_STEP;
        b.text(
            format!("... and {hidden} more item(s)"),
            col_desc,
            y,
            10.0,
            false,
            HEADER_TEXT,
        );
    }

    // Notes, terms, footer.
    y -= LINE_STEP + 12.0;
    for line in notes {
        b.body(line, MARGIN, y, 10.0);
        y -= LINE_STEP;
    }
    let terms = settings.text(PAYMENT_TERMS).unwrap_or(FALLBACK_TERMS);
    b.body(
        truncate(&format!("Payment terms: {terms}"), NOTES_MAX_CHARS),
        MARGIN,
        y,
        10.0,
    );

    let footer = settings.text(FOOTER_TEXT).unwrap_or(FALLBACK_FOOTER);
    b.text(
        truncate(footer, NOTES_MAX_CHARS),
        MARGIN,
        FOOTER_Y,
        10.0,
        false,
        FOOTER_TEXT_TINT,
    );

    PageLayout {
        width: w,
        height: h,
        ops: b.ops,
    }
}

fn fit_logo(px_w: u32, px_h: u32) -> (f32, f32) {
    let (pw, ph) = (px_w as f32, px_h as f32);
    let scale = (LOGO_BOX_W / pw).min(LOGO_BOX_H / ph);
    (pw * scale, ph * scale)
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// `YYYY-MM-DD` part of a stored date or timestamp.
fn date_part(s: &str) -> &str {
    let s = s.trim();
    match s.char_indices().nth(10) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn money(v: f64) -> String {
    format!("{:.2}", v)
}

fn quantity(v: f64) -> String {
    let s = format!("{:.2}", v);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

fn notes_lines(notes: &str) -> Vec<String> {
    let text = format!("Notes: {}", non_empty(Some(notes)).unwrap_or("N/A"));
    let mut lines = split_and_wrap_lines(&text, NOTES_MAX_CHARS);
    if lines.len() > NOTES_MAX_LINES {
        lines.truncate(NOTES_MAX_LINES);
        if let Some(last) = lines.last_mut() {
            *last = truncate(&format!("{last} ..."), NOTES_MAX_CHARS);
            if !last.ends_with("...") {
                last.push_str("...");
            }
        }
    }
    lines
}

fn wrap_text_lines(input: &str, max_chars: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in input.split_whitespace() {
        // Words longer than a line are hard-split.
        let chars: Vec<char> = word.chars().collect();
        for chunk in chars.chunks(max_chars.max(1)) {
            let piece: String = chunk.iter().collect();
            if current.is_empty() {
                current = piece;
            } else if current.chars().count() + 1 + piece.chars().count() <= max_chars {
                current.push(' ');
                current.push_str(&piece);
            } else {
                out.push(std::mem::replace(&mut current, piece));
            }
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_and_wrap_lines(input: &str, max_chars: usize) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .flat_map(|s| wrap_text_lines(s, max_chars))
        .collect()
}

/// Decodes a `data:image/{png,jpeg,jpg};base64,...` URL. Anything else,
/// including corrupt image bytes, yields `None`.
pub fn decode_logo(data_url: &str) -> Option<DynamicImage> {
    let s = data_url.trim();
    let (meta, payload) = s.split_once(',')?;
    let meta = meta.to_ascii_lowercase();
    let meta = meta.strip_prefix("data:")?;
    let media = meta.strip_suffix(";base64")?;

    let media_type: mime::Mime = media.trim().parse().ok()?;
    if media_type.type_() != mime::IMAGE {
        return None;
    }
    let format = match media_type.subtype().as_str() {
        "png" => ImageFormat::Png,
        "jpeg" | "jpg" => ImageFormat::Jpeg,
        _ => return None,
    };

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .ok()?;
    image_crate::load_from_memory_with_format(&bytes, format).ok()
}

/// Download name for the rendered document, safe for a
/// `Content-Disposition` header.
pub fn pdf_filename(invoice: &HydratedInvoice) -> String {
    let name = sanitize_filename(&format!("invoice-{}", invoice.display_number()));
    format!("{name}.pdf")
}

fn sanitize_filename(input: &str) -> String {
    let out: String = input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "invoice".to_string()
    } else {
        out
    }
}

/// Renders `invoice` to a complete PDF document. A logo that cannot be
/// decoded is replaced by the placeholder block; every other failure is
/// returned and no bytes are produced.
pub fn render_invoice_pdf(invoice: &HydratedInvoice, settings: &Settings) -> Result<Vec<u8>> {
    let logo = settings.company_logo().and_then(decode_logo);
    let layout = layout_invoice(invoice, settings, logo.as_ref().map(|img| img.dimensions()));

    let regular_face = parse_face(FONT_REGULAR)?;
    let bold_face = parse_face(FONT_BOLD)?;
    for op in &layout.ops {
        if let DrawOp::Text { bold, text, .. } = op {
            let face = if *bold { &bold_face } else { &regular_face };
            ensure_glyphs(face, text)?;
        }
    }

    let stamp = parse_timestamp(&invoice.date).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let title = format!("Invoice {}", invoice.display_number());

    let (doc, page, layer) =
        PdfDocument::new(&title, mm(layout.width), mm(layout.height), "Layer 1");
    let doc = doc
        .with_document_id(format!("invoice-{:010}", invoice.id))
        .with_creation_date(stamp)
        .with_mod_date(stamp)
        .with_metadata_date(stamp);

    let regular = doc.add_external_font(Cursor::new(FONT_REGULAR))?;
    let bold = doc.add_external_font(Cursor::new(FONT_BOLD))?;
    let layer = doc.get_page(page).get_layer(layer);

    for op in &layout.ops {
        match op {
            DrawOp::Rect { x, y, w, h, tint } => fill_rect(&layer, *x, *y, *w, *h, *tint),
            DrawOp::Text {
                x,
                y,
                size,
                bold: is_bold,
                tint,
                text,
            } => {
                let font = if *is_bold { &bold } else { &regular };
                push_line(&layer, font, text, *size, *x, *y, *tint);
            }
            DrawOp::Logo { x, y, w, .. } => {
                if let Some(img) = &logo {
                    let (px_w, _) = img.dimensions();
                    // At 72 dpi one pixel is one point.
                    let scale = *w / px_w.max(1) as f32;
                    Image::from_dynamic_image(img).add_to_layer(
                        layer.clone(),
                        ImageTransform {
                            translate_x: Some(mm(*x)),
                            translate_y: Some(mm(*y)),
                            rotate: None,
                            scale_x: Some(scale),
                            scale_y: Some(scale),
                            dpi: Some(LOGO_DPI),
                        },
                    );
                }
            }
        }
    }

    let mut bytes = doc.save_to_bytes()?;
    pin_trailer_id(&mut bytes, &trailer_id(invoice.id))?;
    Ok(bytes)
}

fn parse_face(bytes: &'static [u8]) -> Result<ttf_parser::Face<'static>> {
    ttf_parser::Face::parse(bytes, 0)
        .map_err(|e| InvoiceError::Render(format!("embedded font: {e}")))
}

/// Text the embedded faces cannot draw is an error instead of a silent gap.
fn ensure_glyphs(face: &ttf_parser::Face<'_>, text: &str) -> Result<()> {
    match text
        .chars()
        .find(|ch| !ch.is_whitespace() && face.glyph_index(*ch).is_none())
    {
        Some(ch) => Err(InvoiceError::Render(format!(
            "character {ch:?} (U+{:04X}) in {text:?} is not covered by the invoice font",
            ch as u32
        ))),
        None => Ok(()),
    }
}

/// A stable stand-in for printpdf's random trailer id, derived from the
/// invoice id and of the same length.
fn trailer_id(invoice_id: i64) -> String {
    format!("{:0>width$}", invoice_id.unsigned_abs(), width = TRAILER_ID_LEN)
}

/// Overwrites both strings of the trailer `/ID[(..)(..)]` in place. The
/// replacement has the original length so xref offsets stay valid.
fn pin_trailer_id(bytes: &mut [u8], id: &str) -> Result<()> {
    const MARKER: &[u8] = b"/ID[(";
    let missing = || InvoiceError::Render("PDF trailer has no /ID entry".to_string());

    if id.len() != TRAILER_ID_LEN {
        return Err(InvoiceError::Render(format!(
            "trailer id must be {TRAILER_ID_LEN} bytes, got {}",
            id.len()
        )));
    }

    let start = bytes
        .windows(MARKER.len())
        .rposition(|w| w == MARKER)
        .ok_or_else(missing)?
        + MARKER.len();
    let second = start + TRAILER_ID_LEN;
    let end = second + 2 + TRAILER_ID_LEN;
    if bytes.len() < end + 2
        || &bytes[second..second + 2] != b")("
        || &bytes[end..end + 2] != b")]"
    {
        return Err(missing());
    }

    bytes[start..second].copy_from_slice(id.as_bytes());
    bytes[second + 2..end].copy_from_slice(id.as_bytes());
    Ok(())
}

fn mm(pt: f32) -> Mm {
    Mm::from(Pt(pt))
}

fn fill_rect(layer: &PdfLayerReference, x: f32, y: f32, w: f32, h: f32, tint: Tint) {
    layer.set_fill_color(color(tint));
    let rect = Rect::new(mm(x), mm(y), mm(x + w), mm(y + h)).with_mode(PaintMode::Fill);
    layer.add_rect(rect);
}

fn push_line(
    layer: &PdfLayerReference,
    font: &IndirectFontRef,
    text: &str,
    font_size: f32,
    x: f32,
    y: f32,
    tint: Tint,
) {
    layer.set_fill_color(color(tint));
    layer.use_text(text, font_size, mm(x), mm(y), font);
}

fn color(t: Tint) -> Color {
    Color::Rgb(Rgb::new(t.r, t.g, t.b, None))
}
