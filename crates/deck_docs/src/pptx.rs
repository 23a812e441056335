use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::{Context, Result};
use deck_core::PipelineError;
use tracing::{debug, info};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::deck::{Deck, Slide, SlideLayout};

/// EMUs per inch.
const EMU: u64 = 914_400;
const SLIDE_CX: u64 = 10 * EMU;
const SLIDE_CY: u64 = EMU * 15 / 2;

const TITLE_COLOR: &str = "003366";
const BODY_COLOR: &str = "333333";
const CONTENT_BG: &str = "F0F0F0";
const COVER_BG: &str = "F0F8FF";

/// Title size in hundredths of a point.
const TITLE_SZ: u32 = 3200;
const BODY_SZ: u32 = 1400;
const CAPTION_SZ: u32 = 1100;

const REL_SLIDE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide";
const REL_LAYOUT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout";
const REL_IMAGE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

const NS: &str = r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main""#;

/// Write `deck` as a `.pptx` file. Returns the number of bytes written.
pub fn write_pptx(deck: &Deck, path: &Path) -> Result<u64, PipelineError> {
    let bytes = render_pptx(deck)
        .map_err(|e| PipelineError::Assembly(format!("failed to build presentation: {e:#}")))?;
    std::fs::write(path, &bytes).map_err(|e| {
        PipelineError::Assembly(format!("failed to write {}: {e}", path.display()))
    })?;
    info!(
        path = %path.display(),
        slides = deck.len(),
        bytes = bytes.len(),
        "presentation written"
    );
    Ok(bytes.len() as u64)
}

/// Serialize `deck` into OOXML presentation bytes.
pub fn render_pptx(deck: &Deck) -> Result<Vec<u8>> {
    let mut pkg = Package::new();
    let images = assign_media(&deck.slides);

    let has_png = images.iter().any(Option::is_some);
    pkg.part("[Content_Types].xml", &content_types_xml(deck.len(), has_png))?;
    pkg.part("_rels/.rels", ROOT_RELS)?;
    pkg.part("docProps/core.xml", &core_props_xml(&deck.title))?;
    pkg.part("ppt/presentation.xml", &presentation_xml(deck.len()))?;
    pkg.part("ppt/_rels/presentation.xml.rels", &presentation_rels_xml(deck.len()))?;
    pkg.part("ppt/slideMasters/slideMaster1.xml", SLIDE_MASTER)?;
    pkg.part("ppt/slideMasters/_rels/slideMaster1.xml.rels", SLIDE_MASTER_RELS)?;
    pkg.part("ppt/slideLayouts/slideLayout1.xml", SLIDE_LAYOUT)?;
    pkg.part("ppt/slideLayouts/_rels/slideLayout1.xml.rels", SLIDE_LAYOUT_RELS)?;
    pkg.part("ppt/theme/theme1.xml", THEME)?;

    for (i, (slide, media)) in deck.slides.iter().zip(&images).enumerate() {
        let n = i + 1;
        pkg.part(&format!("ppt/slides/slide{n}.xml"), &slide_xml(slide))?;
        pkg.part(
            &format!("ppt/slides/_rels/slide{n}.xml.rels"),
            &slide_rels_xml(media.as_deref()),
        )?;
        if let (Some(name), Some(image)) = (media, &slide.image) {
            pkg.binary(&format!("ppt/media/{name}"), &image.png)?;
        }
    }

    let bytes = pkg.finish()?;
    debug!(slides = deck.len(), bytes = bytes.len(), "pptx package built");
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Zip package
// ---------------------------------------------------------------------------

struct Package {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl Package {
    fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    fn part(&mut self, name: &str, xml: &str) -> Result<()> {
        self.binary(name, xml.as_bytes())
    }

    fn binary(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.zip
            .start_file(name, self.options)
            .with_context(|| format!("Failed to create {name}"))?;
        self.zip
            .write_all(bytes)
            .with_context(|| format!("Failed to write {name}"))
    }

    fn finish(self) -> Result<Vec<u8>> {
        let cursor = self.zip.finish().context("Failed to finalize PPTX zip")?;
        Ok(cursor.into_inner())
    }
}

/// Media file name for each slide that carries a picture.
fn assign_media(slides: &[Slide]) -> Vec<Option<String>> {
    let mut next = 0;
    slides
        .iter()
        .map(|s| {
            s.image.as_ref().map(|_| {
                next += 1;
                format!("image{next}.png")
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Package-level parts
// ---------------------------------------------------------------------------

/// Escape markup and replace characters XML 1.0 cannot carry with a space.
fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            '\u{0}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

fn content_types_xml(slide_count: usize, has_png: bool) -> String {
    let slide_ct = "application/vnd.openxmlformats-officedocument.presentationml.slide+xml";
    let overrides: String = (1..=slide_count)
        .map(|i| format!("<Override PartName=\"/ppt/slides/slide{i}.xml\" ContentType=\"{slide_ct}\"/>"))
        .collect();
    let png = if has_png {
        r#"<Default Extension="png" ContentType="image/png"/>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{png}<Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/><Override PartName="/ppt/slideMasters/slideMaster1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml"/><Override PartName="/ppt/slideLayouts/slideLayout1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml"/><Override PartName="/ppt/theme/theme1.xml" ContentType="application/vnd.openxmlformats-officedocument.theme+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>{overrides}</Types>"#
    )
}

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="ppt/presentation.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

fn core_props_xml(title: &str) -> String {
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:title>{}</dc:title><dc:creator>sheetdeck</dc:creator><dcterms:created xsi:type="dcterms:W3CDTF">{created}</dcterms:created></cp:coreProperties>"#,
        xml_escape(title)
    )
}

// Relationship ids in presentation.xml.rels: rId1 master, rId2 theme,
// slides from rId3.
fn presentation_xml(slide_count: usize) -> String {
    let ids: String = (1..=slide_count)
        .map(|i| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 255 + i, i + 2))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:presentation {NS}><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:sldIdLst>{ids}</p:sldIdLst><p:sldSz cx="{SLIDE_CX}" cy="{SLIDE_CY}"/><p:notesSz cx="{SLIDE_CY}" cy="{SLIDE_CX}"/></p:presentation>"#
    )
}

fn presentation_rels_xml(slide_count: usize) -> String {
    let slides: String = (1..=slide_count)
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{}" Type="{REL_SLIDE}" Target="slides/slide{i}.xml"/>"#,
                i + 2
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster" Target="slideMasters/slideMaster1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme" Target="theme/theme1.xml"/>{slides}</Relationships>"#
    )
}

const EMPTY_TREE: &str = r#"<p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/></p:spTree>"#;

const SLIDE_MASTER: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sldMaster xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:bg><p:bgPr><a:solidFill><a:srgbClr val="F0F0F0"/></a:solidFill><a:effectLst/></p:bgPr></p:bg>"#,
    r#"<p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/></p:spTree>"#,
    r#"</p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst></p:sldMaster>"#
);

const SLIDE_MASTER_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout" Target="../slideLayouts/slideLayout1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme" Target="../theme/theme1.xml"/></Relationships>"#;

const SLIDE_LAYOUT: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sldLayout xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" type="blank"><p:cSld name="Blank">"#,
    r#"<p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/></p:spTree>"#,
    r#"</p:cSld></p:sldLayout>"#
);

const SLIDE_LAYOUT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster" Target="../slideMasters/slideMaster1.xml"/></Relationships>"#;

const THEME: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<a:theme xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" name="Sheetdeck"><a:themeElements><a:clrScheme name="Sheetdeck"><a:dk1><a:srgbClr val="333333"/></a:dk1><a:lt1><a:srgbClr val="FFFFFF"/></a:lt1><a:dk2><a:srgbClr val="003366"/></a:dk2><a:lt2><a:srgbClr val="F0F0F0"/></a:lt2><a:accent1><a:srgbClr val="1F77B4"/></a:accent1><a:accent2><a:srgbClr val="6BAED6"/></a:accent2><a:accent3><a:srgbClr val="08306B"/></a:accent3><a:accent4><a:srgbClr val="9ECAE1"/></a:accent4><a:accent5><a:srgbClr val="4292C6"/></a:accent5><a:accent6><a:srgbClr val="C6DBEF"/></a:accent6><a:hlink><a:srgbClr val="0563C1"/></a:hlink><a:folHlink><a:srgbClr val="954F72"/></a:folHlink></a:clrScheme><a:fontScheme name="Sheetdeck"><a:majorFont><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:majorFont><a:minorFont><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:minorFont></a:fontScheme><a:fmtScheme name="Sheetdeck"><a:fillStyleLst><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:fillStyleLst><a:lnStyleLst><a:ln w="6350"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln><a:ln w="12700"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln><a:ln w="19050"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln></a:lnStyleLst><a:effectStyleLst><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle></a:effectStyleLst><a:bgFillStyleLst><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:bgFillStyleLst></a:fmtScheme></a:themeElements></a:theme>"#;

// ---------------------------------------------------------------------------
// Slides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: u64,
    y: u64,
    cx: u64,
    cy: u64,
}

impl Rect {
    /// Build from inches.
    fn inches(x: f64, y: f64, cx: f64, cy: f64) -> Self {
        let emu = |v: f64| (v * EMU as f64).round() as u64;
        Self {
            x: emu(x),
            y: emu(y),
            cx: emu(cx),
            cy: emu(cy),
        }
    }

    fn xfrm(&self) -> String {
        format!(
            r#"<a:xfrm><a:off x="{}" y="{}"/><a:ext cx="{}" cy="{}"/></a:xfrm>"#,
            self.x, self.y, self.cx, self.cy
        )
    }

    /// Largest rect of aspect `w:h` centred inside `self`.
    fn fit(&self, w: u32, h: u32) -> Self {
        if w == 0 || h == 0 {
            return *self;
        }
        let scale = (self.cx as f64 / w as f64).min(self.cy as f64 / h as f64);
        let cx = (w as f64 * scale).round() as u64;
        let cy = (h as f64 * scale).round() as u64;
        Self {
            x: self.x + (self.cx - cx.min(self.cx)) / 2,
            y: self.y + (self.cy - cy.min(self.cy)) / 2,
            cx,
            cy,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Para {
    Bullet,
    Centered,
    Plain,
}

fn run(text: &str, sz: u32, bold: bool, color: &str) -> String {
    format!(
        r#"<a:r><a:rPr lang="en-US" sz="{sz}" b="{}" dirty="0"><a:solidFill><a:srgbClr val="{color}"/></a:solidFill></a:rPr><a:t>{}</a:t></a:r>"#,
        u8::from(bold),
        xml_escape(text)
    )
}

fn paragraph(text: &str, style: Para, sz: u32, bold: bool, color: &str) -> String {
    let ppr = match style {
        Para::Bullet => r#"<a:pPr marL="285750" indent="-285750"><a:buFont typeface="Arial"/><a:buChar char="&#8226;"/></a:pPr>"#,
        Para::Centered => r#"<a:pPr algn="ctr"><a:buNone/></a:pPr>"#,
        Para::Plain => r#"<a:pPr><a:buNone/></a:pPr>"#,
    };
    format!("<a:p>{ppr}{}</a:p>", run(text, sz, bold, color))
}

fn text_shape(id: u32, name: &str, rect: Rect, paragraphs: &str, anchor: &str) -> String {
    let body = if paragraphs.is_empty() {
        r#"<a:p><a:endParaRPr lang="en-US"/></a:p>"#
    } else {
        paragraphs
    };
    format!(
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="{name}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr>{}<a:prstGeom prst="rect"><a:avLst/></a:prstGeom><a:noFill/></p:spPr><p:txBody><a:bodyPr wrap="square" anchor="{anchor}"><a:normAutofit/></a:bodyPr><a:lstStyle/>{body}</p:txBody></p:sp>"#,
        rect.xfrm()
    )
}

fn picture_shape(id: u32, rel_id: &str, rect: Rect, descr: &str) -> String {
    format!(
        r#"<p:pic><p:nvPicPr><p:cNvPr id="{id}" name="Chart" descr="{}"/><p:cNvPicPr><a:picLocks noChangeAspect="1"/></p:cNvPicPr><p:nvPr/></p:nvPicPr><p:blipFill><a:blip r:embed="{rel_id}"/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr>{}<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic>"#,
        xml_escape(descr),
        rect.xfrm()
    )
}

fn slide_xml(slide: &Slide) -> String {
    let (background, shapes) = match slide.layout {
        SlideLayout::Cover => {
            let title = paragraph(&slide.title, Para::Centered, TITLE_SZ, true, TITLE_COLOR);
            let lines: String = slide
                .bullets
                .iter()
                .map(|l| paragraph(l, Para::Centered, BODY_SZ + 400, false, BODY_COLOR))
                .collect();
            let shapes = text_shape(2, "Title", Rect::inches(0.75, 2.25, 8.5, 1.5), &title, "b")
                + &text_shape(3, "Subtitle", Rect::inches(0.75, 3.9, 8.5, 1.5), &lines, "t");
            (COVER_BG, shapes)
        }
        SlideLayout::Content => {
            let title = paragraph(&slide.title, Para::Plain, TITLE_SZ, true, TITLE_COLOR);
            let bullets: String = slide
                .bullets
                .iter()
                .map(|b| paragraph(b, Para::Bullet, BODY_SZ, false, BODY_COLOR))
                .collect();
            let shapes = text_shape(2, "Title", Rect::inches(0.5, 0.3, 9.0, 1.2), &title, "ctr")
                + &text_shape(3, "Content", Rect::inches(0.75, 1.6, 8.5, 5.4), &bullets, "t");
            (CONTENT_BG, shapes)
        }
        SlideLayout::Chart => {
            let title = paragraph(&slide.title, Para::Plain, TITLE_SZ, true, TITLE_COLOR);
            let caption: String = slide
                .bullets
                .iter()
                .map(|c| paragraph(c, Para::Centered, CAPTION_SZ, false, BODY_COLOR))
                .collect();
            let mut shapes =
                text_shape(2, "Title", Rect::inches(0.5, 0.3, 9.0, 1.2), &title, "ctr");
            if let Some(image) = &slide.image {
                let frame = Rect::inches(1.0, 1.75, 8.0, 5.0).fit(image.width, image.height);
                shapes.push_str(&picture_shape(3, "rId2", frame, &image.caption));
            }
            shapes.push_str(&text_shape(
                4,
                "Caption",
                Rect::inches(1.0, 6.8, 8.0, 0.6),
                &caption,
                "t",
            ));
            (CONTENT_BG, shapes)
        }
    };

    let tree = EMPTY_TREE.replace("</p:spTree>", &format!("{shapes}</p:spTree>"));
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld {NS}><p:cSld><p:bg><p:bgPr><a:solidFill><a:srgbClr val="{background}"/></a:solidFill><a:effectLst/></p:bgPr></p:bg>{tree}</p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#
    )
}

fn slide_rels_xml(media: Option<&str>) -> String {
    let image = media
        .map(|name| format!(r#"<Relationship Id="rId2" Type="{REL_IMAGE}" Target="../media/{name}"/>"#))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_LAYOUT}" Target="../slideLayouts/slideLayout1.xml"/>{image}</Relationships>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_data::{ChartImage, ChartKind};
    use std::io::Read;

    fn chart() -> ChartImage {
        ChartImage {
            png: b"\x89PNG\r\n\x1a\nfake".to_vec(),
            width: 800,
            height: 500,
            kind: ChartKind::Box,
            column: "revenue".into(),
            compared_with: None,
            caption: "Box plot of revenue: median 12.00".into(),
        }
    }

    fn deck() -> Deck {
        Deck {
            title: "Revenue & Friends".into(),
            slides: vec![
                Slide::cover("Revenue & Friends", vec!["Generated today".into()]),
                Slide::content("Introduction", vec!["First <point>".into(), "Second".into()]),
                Slide::chart("Box Plot of revenue", chart()),
                Slide::content("Empty", Vec::new()),
                Slide::cover("Thank You", Vec::new()),
            ],
        }
    }

    fn read_part(bytes: &[u8], name: &str) -> Vec<u8> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        out
    }

    fn read_text(bytes: &[u8], name: &str) -> String {
        String::from_utf8(read_part(bytes, name)).unwrap()
    }

    #[test]
    fn package_contains_all_parts() {
        let bytes = render_pptx(&deck()).unwrap();
        assert_eq!(&bytes[0..2], b"PK");

        let archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for expected in [
            "[Content_Types].xml",
            "_rels/.rels",
            "docProps/core.xml",
            "ppt/presentation.xml",
            "ppt/slideMasters/slideMaster1.xml",
            "ppt/slideLayouts/slideLayout1.xml",
            "ppt/theme/theme1.xml",
            "ppt/slides/slide5.xml",
            "ppt/media/image1.png",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert!(!names.contains(&"ppt/slides/slide6.xml"));
    }

    #[test]
    fn presentation_lists_every_slide_at_ten_by_seven_and_a_half() {
        let bytes = render_pptx(&deck()).unwrap();
        let xml = read_text(&bytes, "ppt/presentation.xml");
        assert_eq!(xml.matches("<p:sldId ").count(), 5);
        assert!(xml.contains(r#"<p:sldSz cx="9144000" cy="6858000"/>"#));
        let rels = read_text(&bytes, "ppt/_rels/presentation.xml.rels");
        assert!(rels.contains(r#"Id="rId7""#));
    }

    #[test]
    fn chart_slide_embeds_picture() {
        let bytes = render_pptx(&deck()).unwrap();
        let slide = read_text(&bytes, "ppt/slides/slide3.xml");
        assert!(slide.contains(r#"<a:blip r:embed="rId2"/>"#));
        // 8in x 5in at (1in, 1.75in)
        assert!(slide.contains(r#"<a:off x="914400" y="1600200"/><a:ext cx="7315200" cy="4572000"/>"#));
        let rels = read_text(&bytes, "ppt/slides/_rels/slide3.xml.rels");
        assert!(rels.contains("../media/image1.png"));
        assert_eq!(read_part(&bytes, "ppt/media/image1.png"), chart().png);

        let types = read_text(&bytes, "[Content_Types].xml");
        assert!(types.contains(r#"Extension="png""#));
    }

    #[test]
    fn text_is_styled_and_escaped() {
        let bytes = render_pptx(&deck()).unwrap();
        let cover = read_text(&bytes, "ppt/slides/slide1.xml");
        assert!(cover.contains("Revenue &amp; Friends"));
        assert!(cover.contains(r#"val="F0F8FF""#));
        assert!(cover.contains(r#"sz="3200""#));

        let content = read_text(&bytes, "ppt/slides/slide2.xml");
        assert!(content.contains("First &lt;point&gt;"));
        assert!(content.contains(r#"val="F0F0F0""#));
        assert!(content.contains(r#"sz="1400""#));
        assert!(content.contains(r#"val="003366""#));
        assert!(content.contains(r#"val="333333""#));
        assert!(content.contains("<a:buChar"));

        let rels = read_text(&bytes, "ppt/slides/_rels/slide2.xml.rels");
        assert!(!rels.contains("image"));
    }

    #[test]
    fn control_characters_never_reach_the_xml() {
        let deck = Deck {
            title: "Sales\u{0007}".into(),
            slides: vec![Slide::content(
                "Col\u{001B}umn",
                vec!["Revenue\u{000B}rose\u{0007}".into(), "tab\tkept".into()],
            )],
        };
        let bytes = render_pptx(&deck).unwrap();
        let slide = read_part(&bytes, "ppt/slides/slide1.xml");
        assert!(
            !slide.iter().any(|b| *b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')),
            "slide contains illegal control bytes"
        );
        let text = String::from_utf8(slide).unwrap();
        assert!(text.contains("Revenue rose "));
        assert!(text.contains("tab\tkept"));
        let core = read_part(&bytes, "docProps/core.xml");
        assert!(!core.contains(&0x07));
        assert_eq!(xml_escape("a\u{0}b\u{FFFF}"), "a b ");
    }

    #[test]
    fn empty_body_still_has_a_paragraph() {
        let bytes = render_pptx(&deck()).unwrap();
        let slide = read_text(&bytes, "ppt/slides/slide4.xml");
        assert!(slide.contains("<a:endParaRPr"));
    }

    #[test]
    fn deck_without_chart_has_no_png_type() {
        let deck = Deck {
            title: "t".into(),
            slides: vec![Slide::content("Only", vec!["x".into()])],
        };
        let bytes = render_pptx(&deck).unwrap();
        let types = read_text(&bytes, "[Content_Types].xml");
        assert!(!types.contains("image/png"));
    }

    #[test]
    fn each_chart_slide_gets_its_own_media_part() {
        let mut pair = chart();
        pair.compared_with = Some("units".into());
        pair.png = b"\x89PNG\r\n\x1a\nsecond".to_vec();
        let deck = Deck {
            title: "t".into(),
            slides: vec![
                Slide::chart("Box Plot of revenue", chart()),
                Slide::content("Between", vec!["x".into()]),
                Slide::chart("Comparison Plot: revenue vs units", pair.clone()),
            ],
        };
        let bytes = render_pptx(&deck).unwrap();
        assert_eq!(read_part(&bytes, "ppt/media/image1.png"), chart().png);
        assert_eq!(read_part(&bytes, "ppt/media/image2.png"), pair.png);
        let rels = read_text(&bytes, "ppt/slides/_rels/slide3.xml.rels");
        assert!(rels.contains("../media/image2.png"));
        let types = read_text(&bytes, "[Content_Types].xml");
        assert_eq!(types.matches(r#"Extension="png""#).count(), 1);
    }

    #[test]
    fn picture_keeps_aspect_ratio() {
        let frame = Rect::inches(1.0, 1.75, 8.0, 5.0).fit(500, 500);
        assert_eq!(frame.cx, frame.cy);
        assert_eq!(frame.cy, 5 * EMU);
        assert_eq!(frame.x, EMU + (8 * EMU - 5 * EMU) / 2);
    }

    #[test]
    fn write_pptx_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        let written = write_pptx(&deck(), &path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), written);
    }

    #[test]
    fn write_failure_is_assembly_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("deck.pptx");
        let err = write_pptx(&deck(), &path).unwrap_err();
        assert!(matches!(err, PipelineError::Assembly(_)));
        assert!(!path.exists());
    }
}
