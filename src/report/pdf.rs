use super::chart::{self, ChartGeometry};
use super::{ReportLayout, Verdict, FOOTER, TITLE};
use crate::{Error, Result};
use image::DynamicImage;
use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Line, Mm, PdfDocument,
    PdfDocumentReference, PdfLayerReference, Point, Rect, Rgb,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 10.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const PT_TO_MM: f32 = 0.3528;
const ROW_HEIGHT: f32 = 7.0;
const CELL_PADDING: f32 = 2.0;
const LOGO_SIZE: f32 = 35.0;
const CHART_WIDTH: f32 = 170.0;
const IMAGE_DPI: f32 = 150.0;

const TITLE_COLOR: u32 = 0x003045;
const SECTION_COLOR: u32 = 0x007acc;
const SUBTITLE_COLOR: u32 = 0x666666;
const TEXT_COLOR: u32 = 0x000000;
const HEADER_TEXT_COLOR: u32 = 0xffffff;
const ROW_COLOR: u32 = 0xf5f5f5;
const GRID_COLOR: u32 = 0xd3d3d3;
const PASS_COLOR: u32 = 0x008000;
const FAIL_COLOR: u32 = 0xff0000;
const BAR_COLOR: u32 = 0x007acc;
const TREND_COLOR: u32 = 0x003045;
const MEAN_COLOR: u32 = 0xff6b6b;

fn rgb(hex: u32) -> Color {
    let channel = |shift: u32| ((hex >> shift) & 0xff) as f32 / 255.0;
    Color::Rgb(Rgb::new(channel(16), channel(8), channel(0), None))
}

fn pdf_error<E: std::fmt::Display>(err: E) -> Error {
    Error::Composition(format!("PDF error: {err}"))
}

/// Rough width of `text` in Helvetica; good enough for centring.
fn text_width(text: &str, size: f32, bold: bool) -> f32 {
    let em = if bold { 0.56 } else { 0.5 };
    text.chars().count() as f32 * size * em * PT_TO_MM
}

/// Native size of `image` in mm at [`IMAGE_DPI`].
fn image_size(image: &DynamicImage) -> (f32, f32) {
    let to_mm = |px: u32| px as f32 / IMAGE_DPI * 25.4;
    (to_mm(image.width()), to_mm(image.height()))
}

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
    Italic,
}

/// Top-down writer on a single A4 page; `cursor` is the baseline in mm from the bottom.
struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
    cursor: f32,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self> {
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Report");
        let layer = doc.get_page(page).get_layer(layer);
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(pdf_error)?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(pdf_error)?;
        let italic = doc
            .add_builtin_font(BuiltinFont::HelveticaOblique)
            .map_err(pdf_error)?;
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            italic,
            cursor: PAGE_HEIGHT - MARGIN,
        })
    }

    fn font(&self, font: Font) -> &IndirectFontRef {
        match font {
            Font::Regular => &self.regular,
            Font::Bold => &self.bold,
            Font::Italic => &self.italic,
        }
    }

    fn text(&self, text: &str, size: f32, x: f32, y: f32, font: Font, color: u32) {
        self.layer.set_fill_color(rgb(color));
        self.layer.use_text(text, size, Mm(x), Mm(y), self.font(font));
    }

    /// Centres `text` between `left` and `right` on the current baseline.
    fn centered_between(
        &self,
        text: &str,
        size: f32,
        left: f32,
        right: f32,
        font: Font,
        color: u32,
    ) {
        let width = text_width(text, size, matches!(font, Font::Bold));
        let x = left + ((right - left) - width).max(0.0) / 2.0;
        self.text(text, size, x, self.cursor, font, color);
    }

    fn centered(&mut self, text: &str, size: f32, font: Font, color: u32, advance: f32) {
        self.cursor -= size * PT_TO_MM;
        self.centered_between(text, size, MARGIN, PAGE_WIDTH - MARGIN, font, color);
        self.cursor -= advance;
    }

    fn space(&mut self, mm: f32) {
        self.cursor -= mm;
    }

    fn fill_rect(&self, x: f32, y: f32, width: f32, height: f32, color: u32) {
        self.layer.set_fill_color(rgb(color));
        self.layer
            .add_rect(Rect::new(Mm(x), Mm(y), Mm(x + width), Mm(y + height)));
    }

    fn line(&self, from: (f32, f32), to: (f32, f32), color: u32, thickness: f32) {
        self.layer.set_outline_color(rgb(color));
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(from.0), Mm(from.1)), false),
                (Point::new(Mm(to.0), Mm(to.1)), false),
            ],
            is_closed: false,
        });
    }

    fn section(&mut self, title: &str) {
        self.cursor -= 3.0 + 12.0 * PT_TO_MM;
        self.text(title, 12.0, MARGIN, self.cursor, Font::Bold, SECTION_COLOR);
        self.cursor -= 3.0;
    }

    /// Draws a grid table; the first row is the highlighted header.
    fn table<const N: usize>(&mut self, widths: [f32; N], rows: &[[String; N]]) {
        let total: f32 = widths.iter().sum();
        let top = self.cursor;
        for (n, row) in rows.iter().enumerate() {
            let bottom = self.cursor - ROW_HEIGHT;
            let (background, font, color) = if n == 0 {
                (SECTION_COLOR, Font::Bold, HEADER_TEXT_COLOR)
            } else {
                (ROW_COLOR, Font::Regular, TEXT_COLOR)
            };
            self.fill_rect(MARGIN, bottom, total, ROW_HEIGHT, background);
            let mut x = MARGIN;
            for (cell, width) in row.iter().zip(widths) {
                self.text(cell, 9.0, x + CELL_PADDING, bottom + 2.3, font, color);
                x += width;
            }
            self.cursor = bottom;
        }

        let bottom = self.cursor;
        for n in 0..=rows.len() {
            let y = top - n as f32 * ROW_HEIGHT;
            self.line((MARGIN, y), (MARGIN + total, y), GRID_COLOR, 0.5);
        }
        let mut x = MARGIN;
        self.line((x, top), (x, bottom), GRID_COLOR, 0.5);
        for width in widths {
            x += width;
            self.line((x, top), (x, bottom), GRID_COLOR, 0.5);
        }
    }

    /// Places `image` with its lower left corner at (`x`, `y`), scaled to the given box.
    fn image(&self, image: &DynamicImage, x: f32, y: f32, width: f32, height: f32) {
        let (native_width, native_height) = image_size(image);
        Image::from_dynamic_image(image).add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(x)),
                translate_y: Some(Mm(y)),
                scale_x: Some(width / native_width),
                scale_y: Some(height / native_height),
                dpi: Some(IMAGE_DPI),
                ..Default::default()
            },
        );
    }

    fn save(self, destination: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(destination)?);
        self.doc.save(&mut writer).map_err(pdf_error)
    }
}

fn header(page: &mut PageWriter, logo: Option<&DynamicImage>) {
    match logo {
        Some(logo) => {
            let (width, height) = image_size(logo);
            let scale = (LOGO_SIZE / width).min(LOGO_SIZE / height);
            let top = page.cursor;
            page.image(logo, MARGIN, top - height * scale, width * scale, height * scale);
            page.cursor = top - LOGO_SIZE / 2.0;
            let left = MARGIN + LOGO_SIZE + 5.0;
            page.centered_between(TITLE, 20.0, left, PAGE_WIDTH - MARGIN, Font::Bold, TITLE_COLOR);
            page.cursor = top - LOGO_SIZE - 2.0;
        }
        None => page.centered(TITLE, 20.0, Font::Bold, TITLE_COLOR, 3.0),
    }
}

fn status_banner(page: &mut PageWriter, verdict: Verdict) {
    let label = "OVERALL STATUS: ";
    let verdict_text = verdict.to_string();
    let color = match verdict {
        Verdict::Pass => PASS_COLOR,
        Verdict::Attention => FAIL_COLOR,
    };
    page.cursor -= 11.0 * PT_TO_MM;
    let width = text_width(label, 11.0, true) + text_width(&verdict_text, 11.0, true);
    let x = MARGIN + (CONTENT_WIDTH - width) / 2.0;
    page.text(label, 11.0, x, page.cursor, Font::Bold, TEXT_COLOR);
    page.text(
        &verdict_text,
        11.0,
        x + text_width(label, 11.0, true),
        page.cursor,
        Font::Bold,
        color,
    );
    page.space(4.0);
}

fn cell_analysis(page: &mut PageWriter, layout: &ReportLayout, chart_image: &DynamicImage) {
    let Some(geometry) = ChartGeometry::for_cells(&layout.cells) else {
        return;
    };
    page.section("Cell Voltage Analysis");
    page.centered("Cell Voltage Distribution", 10.0, Font::Bold, TEXT_COLOR, 1.5);

    let height = CHART_WIDTH * chart::HEIGHT as f32 / chart::WIDTH as f32;
    let left = (PAGE_WIDTH - CHART_WIDTH) / 2.0;
    let bottom = page.cursor - height;
    page.image(chart_image, left, bottom, CHART_WIDTH, height);

    // y axis values left of the image
    for value in geometry.grid_values() {
        let y = bottom + geometry.y_fraction(value) as f32 * height;
        let text = format!("{value:.0}");
        let x = left - 1.0 - text_width(&text, 7.0, false);
        page.text(&text, 7.0, x, y - 1.0, Font::Regular, SUBTITLE_COLOR);
    }
    page.text("mV", 7.0, left - 8.0, bottom + height + 1.0, Font::Bold, SUBTITLE_COLOR);

    // one tick label per cell
    page.cursor = bottom - 8.0 * PT_TO_MM;
    for index in 1..=geometry.count() {
        let x = left + geometry.x_fraction(index) as f32 * CHART_WIDTH;
        let text = index.to_string();
        let x = x - text_width(&text, 8.0, false) / 2.0;
        page.text(&text, 8.0, x, page.cursor, Font::Regular, TEXT_COLOR);
    }
    page.space(1.5);
    page.centered("Cell Serial Number", 8.0, Font::Regular, SUBTITLE_COLOR, 1.5);

    legend(page, layout);

    if let Some(caption) = layout.statistics_caption() {
        page.space(2.0);
        page.centered(&caption, 9.0, Font::Regular, TEXT_COLOR, 0.0);
    }
}

fn legend(page: &mut PageWriter, layout: &ReportLayout) {
    let average = layout
        .statistics
        .map(|stats| format!("Avg: {}", stats.average))
        .unwrap_or_default();
    let entries = [
        ("Voltage", BAR_COLOR),
        ("Trend", TREND_COLOR),
        (average.as_str(), MEAN_COLOR),
    ];
    let swatch = 3.0;
    let gap = 6.0;
    let width: f32 = entries
        .iter()
        .map(|(label, _)| swatch + 1.5 + text_width(label, 8.0, false) + gap)
        .sum::<f32>()
        - gap;
    page.cursor -= 8.0 * PT_TO_MM;
    let mut x = MARGIN + (CONTENT_WIDTH - width) / 2.0;
    for (label, color) in entries {
        page.fill_rect(x, page.cursor, swatch, swatch, color);
        x += swatch + 1.5;
        page.text(label, 8.0, x, page.cursor, Font::Regular, TEXT_COLOR);
        x += text_width(label, 8.0, false) + gap;
    }
}

/// Renders `layout` as a single page PDF at `destination`.
pub(super) fn write(
    layout: &ReportLayout,
    chart_image: Option<&DynamicImage>,
    logo: Option<&DynamicImage>,
    destination: &Path,
) -> Result<()> {
    let mut page = PageWriter::new("Battery Diagnostic Report")?;

    header(&mut page, logo);
    page.centered(&layout.generated, 9.0, Font::Regular, SUBTITLE_COLOR, 4.0);
    status_banner(&mut page, layout.verdict);

    page.section("Device Overview");
    page.table([45.0, 50.0, 45.0, 50.0], &layout.overview);
    page.space(5.0);

    page.section("Safety Diagnostics");
    page.table([60.0, 130.0], &layout.diagnostics);
    page.space(5.0);

    if let Some(chart_image) = chart_image {
        cell_analysis(&mut page, layout, chart_image);
    }

    page.space(8.0);
    page.centered(FOOTER, 9.0, Font::Italic, SUBTITLE_COLOR, 0.0);
    log::debug!("Report layout ends {:.1}mm above the page bottom", page.cursor);

    page.save(destination)
}
