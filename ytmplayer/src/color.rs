//! Extraction de couleur dominante des pochettes
//!
//! L'image est réduite puis quantifiée sur 4 bits par canal ; la couleur
//! retournée est la moyenne du compartiment le plus peuplé. Suffisant pour
//! teinter l'interface, sans le coût d'un vrai clustering.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Côté maximal de l'image d'analyse
const SAMPLE_SIZE: u32 = 64;

/// Télécharge la miniature et en extrait la couleur dominante (`#rrggbb`)
pub async fn extract_primary_color(url: &str) -> anyhow::Result<String> {
    debug!("Extracting dominant color from {url}");
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let bytes = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    // Le décodage et l'histogramme sont du pur CPU
    tokio::task::spawn_blocking(move || dominant_color(&bytes))
        .await
        .context("color extraction task failed")?
}

/// Couleur dominante d'une image encodée
pub(crate) fn dominant_color(bytes: &[u8]) -> anyhow::Result<String> {
    let image = image::load_from_memory(bytes).context("cannot decode artwork")?;
    let small = image
        .thumbnail(SAMPLE_SIZE, SAMPLE_SIZE)
        .to_rgb8();

    // Compartiments de 4 bits par canal : (somme r, somme g, somme b, effectif)
    let mut buckets: HashMap<(u8, u8, u8), (u64, u64, u64, u64)> = HashMap::new();
    for pixel in small.pixels() {
        let [r, g, b] = pixel.0;
        let key = (r >> 4, g >> 4, b >> 4);
        let entry = buckets.entry(key).or_default();
        entry.0 += u64::from(r);
        entry.1 += u64::from(g);
        entry.2 += u64::from(b);
        entry.3 += 1;
    }

    let (_, (r_sum, g_sum, b_sum, count)) = buckets
        .into_iter()
        .max_by_key(|(_, (_, _, _, count))| *count)
        .context("artwork has no pixels")?;

    Ok(format!(
        "#{:02x}{:02x}{:02x}",
        r_sum / count,
        g_sum / count,
        b_sum / count
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn solid_png(r: u8, g: u8, b: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(16, 16, Rgb([r, g, b]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn solid_image_yields_its_own_color() {
        assert_eq!(dominant_color(&solid_png(0xaa, 0x33, 0x10)).unwrap(), "#aa3310");
    }

    #[test]
    fn majority_color_wins() {
        let mut img = RgbImage::from_pixel(16, 16, Rgb([0x20, 0x20, 0x20]));
        // Un coin clair minoritaire
        for x in 0..4 {
            for y in 0..4 {
                img.put_pixel(x, y, Rgb([0xf0, 0xf0, 0xf0]));
            }
        }
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        assert_eq!(dominant_color(&buf).unwrap(), "#202020");
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(dominant_color(b"definitely not an image").is_err());
    }
}
