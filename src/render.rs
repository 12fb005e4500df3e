//! Drawing bounding boxes around detected text.

use std::fs;

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::{prelude::*, vision::Annotation};

/// Outline color for detected text.
const BOX_COLOR: Rgba<u8> = Rgba([0, 200, 0, 255]);

/// Draw the outline of every annotation onto a copy of the image, and save it
/// as `<output_dir>/<stem>_annotated.png`.
///
/// Returns `None` without writing anything if no annotation has a usable
/// outline.
#[instrument(level = "debug", skip_all, fields(path = %image_path.display()))]
pub fn draw_bounding_boxes(
    image_path: &Path,
    image_data: &[u8],
    annotations: &[Annotation],
    output_dir: &Path,
) -> Result<Option<PathBuf>> {
    let outlines = annotations
        .iter()
        .filter_map(|a| a.bounding_poly.as_ref())
        .filter(|poly| poly.vertices.len() >= 2)
        .collect::<Vec<_>>();
    if outlines.is_empty() {
        debug!("No bounding boxes to draw");
        return Ok(None);
    }

    let mut canvas: RgbaImage = image::load_from_memory(image_data)
        .with_context(|| format!("failed to decode image {:?}", image_path))?
        .to_rgba8();
    for poly in outlines {
        let points = poly
            .vertices
            .iter()
            .map(|v| (v.x as f32, v.y as f32))
            .collect::<Vec<_>>();
        // Connect each corner to the next, closing the loop.
        for (i, &start) in points.iter().enumerate() {
            let end = points[(i + 1) % points.len()];
            draw_line_segment_mut(&mut canvas, start, end, BOX_COLOR);
        }
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {:?}", output_dir))?;
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_owned());
    let output_path = output_dir.join(format!("{stem}_annotated.png"));
    canvas
        .save(&output_path)
        .with_context(|| format!("failed to save annotated image {:?}", output_path))?;
    info!(path = %output_path.display(), "Saved annotated image");
    Ok(Some(output_path))
}
